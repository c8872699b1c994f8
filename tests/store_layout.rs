//! Column store, identity table and host projections

use anyhow::Result;
use soa_cache::store::{IdentityTable, RowId, SoaStorage, Violation};
use soa_cache::SoaError;

soa_cache::soa_store! {
    /// Cached layout sizes keyed by stable row id
    pub struct SizeCache {
        breadth: Breadth => i32,
        obj: Obj => u64,
    }
}

soa_cache::soa_view! {
    pub struct BreadthObj for SizeCache {
        breadth: Breadth,
        obj: Obj,
    }
}

soa_cache::soa_view! {
    pub struct BreadthObjMut<'a> for SizeCache {
        breadth: Breadth,
        obj: Obj,
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn four_rows() -> SizeCache {
    SizeCache::from_columns(vec![0, 1, 2, 3], vec![1, 2, 3, 4])
}

#[test]
fn test_swap_moves_every_column() -> Result<()> {
    init_logging();
    let mut cache = four_rows();
    assert!(cache.check_invariants());

    cache.swap(1, 2)?;
    assert_eq!(cache.column::<Breadth>().as_slice(), &[0, 2, 1, 3]);
    assert_eq!(cache.column::<Obj>().as_slice(), &[1, 3, 2, 4]);
    assert!(cache.check_invariants());

    cache.swap(1, 2)?;
    assert_eq!(cache.column::<Breadth>().as_slice(), &[0, 1, 2, 3]);
    assert_eq!(cache.column::<Obj>().as_slice(), &[1, 2, 3, 4]);
    assert!(cache.check_invariants());
    Ok(())
}

#[test]
fn test_swap_sequence_round_trips() -> Result<()> {
    init_logging();
    let mut cache = four_rows();
    let pairs = [(0, 1), (0, 3), (0, 0), (1, 2), (2, 3)];
    for _ in 0..2 {
        for &(a, b) in &pairs {
            cache.swap(a, b)?;
            assert!(cache.check_invariants(), "after swap({}, {})", a, b);
        }
    }
    for &(a, b) in pairs.iter().rev() {
        cache.swap(a, b)?;
    }
    for &(a, b) in pairs.iter().rev() {
        cache.swap(a, b)?;
    }
    assert_eq!(cache.column::<Breadth>().as_slice(), &[0, 1, 2, 3]);
    assert_eq!(cache.identity().ids(), &[RowId(0), RowId(1), RowId(2), RowId(3)]);
    Ok(())
}

#[test]
fn test_ids_follow_their_rows() -> Result<()> {
    let mut cache = four_rows();
    let id = cache.id_at(0)?;
    cache.swap(0, 3)?;
    assert_eq!(cache.idx_of(id), Some(3));
    assert_eq!(cache.fetch_id::<BreadthObj>(id)?, BreadthObj { breadth: 0, obj: 1 });
    Ok(())
}

#[test]
fn test_swap_self_is_noop() -> Result<()> {
    let mut cache = four_rows();
    cache.swap(2, 2)?;
    assert_eq!(cache.column::<Obj>().as_slice(), &[1, 2, 3, 4]);
    assert!(cache.check_invariants());
    Ok(())
}

#[test]
fn test_swap_out_of_range_changes_nothing() {
    let mut cache = four_rows();
    assert_eq!(
        cache.swap(1, 4),
        Err(SoaError::OutOfRange {
            column: "breadth",
            index: 4,
            len: 4
        })
    );
    assert_eq!(cache.column::<Breadth>().as_slice(), &[0, 1, 2, 3]);
    assert!(cache.check_invariants());
}

#[test]
fn test_fetch_single_row() -> Result<()> {
    let cache = SizeCache::from_columns(vec![6], vec![0]);
    assert_eq!(cache.fetch::<BreadthObj>(0)?.breadth, 6);
    assert!(matches!(
        cache.fetch::<BreadthObj>(1),
        Err(SoaError::OutOfRange { index: 1, len: 1, .. })
    ));
    Ok(())
}

#[test]
fn test_ref_fetch_writes_through() -> Result<()> {
    let mut cache = four_rows();
    {
        let row = cache.ref_fetch::<BreadthObjMut>(0)?;
        assert_eq!(*row.breadth, 0);
        *row.breadth = 2;
        *row.obj += 10;
    }
    assert_eq!(cache.column::<Breadth>().as_slice()[0], 2);
    assert_eq!(cache.column::<Obj>().as_slice()[0], 11);
    assert!(cache.ref_fetch::<BreadthObjMut>(4).is_err());
    Ok(())
}

#[test]
fn test_invariants_break_on_single_column_push() {
    let mut cache = SizeCache::from_columns(vec![6], vec![0]);
    assert!(cache.check_invariants());
    cache.column_mut::<Breadth>().push(8);
    assert!(!cache.check_invariants());
    assert_eq!(
        cache.invariant_report().violations,
        vec![Violation::LengthMismatch {
            column: "breadth",
            len: 2,
            expected: 1
        }]
    );
    assert!(matches!(
        cache.validate(),
        Err(SoaError::InvariantViolation { .. })
    ));
}

#[test]
fn test_from_parts_skips_validation() {
    let identity = IdentityTable::from_raw(vec![RowId(0), RowId(1)], vec![1, 0]);
    let cache = SizeCache::from_parts(identity, vec![1, 2], vec![3, 4]);
    assert!(!cache.check_invariants());
}

#[test]
fn test_push_remove_lifecycle() -> Result<()> {
    init_logging();
    let mut cache = SizeCache::with_capacity(8);
    let ids = (0..5)
        .map(|i| cache.push(i, i as u64 * 10))
        .collect::<Result<Vec<_>, _>>()?;

    cache.remove(ids[1])?;
    cache.remove(ids[4])?;
    assert_eq!(cache.len(), 3);
    assert!(cache.check_invariants());
    for (i, &id) in ids.iter().enumerate() {
        match i {
            1 | 4 => assert!(!cache.contains(id)),
            _ => assert_eq!(cache.fetch_id::<BreadthObj>(id)?.breadth, i as i32),
        }
    }

    let fresh = cache.push(9, 90)?;
    assert!(ids.iter().all(|&old| old != fresh));
    assert_eq!(cache.remove(ids[1]), Err(SoaError::UnknownRow { id: ids[1].0 }));
    Ok(())
}

#[test]
fn test_push_fails_when_id_space_is_exhausted() {
    init_logging();
    let identity = IdentityTable::from_raw(vec![RowId(u32::MAX - 1)], vec![0]);
    let mut cache = SizeCache::from_parts(identity, vec![7], vec![8]);

    assert_eq!(cache.push(9, 10), Err(SoaError::IdSpaceExhausted));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.column::<Breadth>().as_slice(), &[7]);
    assert_eq!(cache.column::<Obj>().as_slice(), &[8]);
}
