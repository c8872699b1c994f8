//! Identity table and index map
//!
//! The identity table records which row id occupies each physical slot; the index map
//! answers the reverse question. Together they let rows move between slots while
//! external code keeps holding the same [`RowId`].

use crate::error::{out_of_range, SoaError, SoaResult};
use crate::store::{RowId, RowIdx};

/// Index map entry for ids that were never issued or have been removed
pub const VACANT: RowIdx = RowIdx::MAX;

/// Column name used when identity accesses go out of range
pub const IDENTITY_COLUMN: &str = "id";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityTable {
    /// slot -> id
    ids: Vec<RowId>,
    /// id -> slot
    index: Vec<RowIdx>,
    /// Next id to issue; ids are never recycled
    next_id: u32,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            index: Vec::with_capacity(capacity),
            next_id: 0,
        }
    }

    /// Identity-seeded table of `rows` rows: slot i holds id i
    pub fn seeded(rows: usize) -> Self {
        Self {
            ids: (0..rows as u32).map(RowId).collect(),
            index: (0..rows).collect(),
            next_id: rows as u32,
        }
    }

    /// Build from raw parts without validation; see `SoaStorage::check_invariants`
    pub fn from_raw(ids: Vec<RowId>, index: Vec<RowIdx>) -> Self {
        let next_id = ids
            .iter()
            .map(|id| id.0.saturating_add(1))
            .max()
            .unwrap_or(0)
            .max(index.len() as u32);
        Self {
            ids,
            index,
            next_id,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[RowId] {
        &self.ids
    }

    pub fn index_map(&self) -> &[RowIdx] {
        &self.index
    }

    pub fn id_at(&self, idx: RowIdx) -> SoaResult<RowId> {
        self.ids
            .get(idx)
            .copied()
            .ok_or_else(|| out_of_range(IDENTITY_COLUMN, idx, self.ids.len()))
    }

    /// Current slot of `id`, if it is live
    pub fn idx_of(&self, id: RowId) -> Option<RowIdx> {
        let idx = *self.index.get(id.0 as usize)?;
        match self.ids.get(idx) {
            Some(&occupant) if occupant == id => Some(idx),
            _ => None,
        }
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.idx_of(id).is_some()
    }

    pub fn check_bounds(&self, idx: RowIdx) -> SoaResult<()> {
        if idx < self.ids.len() {
            Ok(())
        } else {
            Err(out_of_range(IDENTITY_COLUMN, idx, self.ids.len()))
        }
    }

    /// Issue a new id and append it to the last slot
    #[doc(hidden)]
    pub fn issue(&mut self) -> SoaResult<RowId> {
        if self.next_id == u32::MAX {
            return Err(SoaError::IdSpaceExhausted);
        }
        let id = RowId(self.next_id);
        self.next_id += 1;
        self.set_index(id, self.ids.len());
        self.ids.push(id);
        Ok(id)
    }

    /// Exchange the ids in slots `a` and `b` and repair both index entries
    pub(crate) fn swap(&mut self, a: RowIdx, b: RowIdx) -> SoaResult<()> {
        self.check_bounds(a)?;
        self.check_bounds(b)?;
        if a == b {
            return Ok(());
        }
        self.ids.swap(a, b);
        let (id_a, id_b) = (self.ids[a], self.ids[b]);
        self.set_index(id_a, a);
        self.set_index(id_b, b);
        Ok(())
    }

    /// Drop the last slot, vacating its id
    pub(crate) fn pop(&mut self) -> Option<RowId> {
        let id = self.ids.pop()?;
        self.set_index(id, VACANT);
        Some(id)
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
        self.index.fill(VACANT);
    }

    fn set_index(&mut self, id: RowId, idx: RowIdx) {
        let slot = id.0 as usize;
        if slot >= self.index.len() {
            self.index.resize(slot + 1, VACANT);
        }
        self.index[slot] = idx;
    }
}
