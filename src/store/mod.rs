//! Stable-identity structure-of-arrays storage
//!
//! A store owns one [`Column`] per field plus an [`IdentityTable`]. Rows can be moved
//! between physical slots in O(1) with [`SoaStorage::swap`] while external code keeps
//! referring to them by [`RowId`]. Concrete stores are declared with
//! [`soa_store!`](crate::soa_store).

pub mod column;
pub mod identity;
pub mod invariants;
mod macros;

pub use column::{Column, ErasedColumn};
pub use identity::{IdentityTable, VACANT};
pub use invariants::{InvariantReport, Violation};

use crate::error::{out_of_range, SoaError, SoaResult};
use crate::view::{FetchView, RefView};

/// Stable handle for a logical row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub u32);

/// Physical slot; valid until the next reordering
pub type RowIdx = usize;

/// Behaviour shared by every store declared with `soa_store!`.
///
/// Implementors only expose their identity table and columns; the lockstep operations
/// are provided here so every store reorders, removes and validates the same way.
pub trait SoaStorage: Sized + 'static {
    const NAME: &'static str;
    const COLUMN_NAMES: &'static [&'static str];

    fn identity(&self) -> &IdentityTable;

    /// All columns in declaration order
    fn erased_columns(&self) -> Vec<&dyn ErasedColumn>;

    /// Identity table and all columns, borrowed disjointly
    fn parts_mut(&mut self) -> (&mut IdentityTable, Vec<&mut dyn ErasedColumn>);

    fn len(&self) -> usize {
        self.identity().len()
    }

    fn is_empty(&self) -> bool {
        self.identity().is_empty()
    }

    fn idx_of(&self, id: RowId) -> Option<RowIdx> {
        self.identity().idx_of(id)
    }

    fn id_at(&self, idx: RowIdx) -> SoaResult<RowId> {
        self.identity().id_at(idx)
    }

    fn contains(&self, id: RowId) -> bool {
        self.identity().contains(id)
    }

    fn column<C: ColumnOf<Self>>(&self) -> &Column<C::Elem> {
        C::column(self)
    }

    /// Direct mutable access to one column.
    ///
    /// Changing the column's length here breaks lockstep; `check_invariants` reports it.
    fn column_mut<C: ColumnOf<Self>>(&mut self) -> &mut Column<C::Elem> {
        C::column_mut(self)
    }

    /// Exchange the rows in slots `a` and `b` across every column and the identity
    /// table. Bounds are checked before anything moves, so a failed swap is a no-op.
    fn swap(&mut self, a: RowIdx, b: RowIdx) -> SoaResult<()> {
        let (identity, mut columns) = self.parts_mut();
        for column in &columns {
            for idx in [a, b] {
                if idx >= column.len() {
                    return Err(out_of_range(column.name(), idx, column.len()));
                }
            }
        }
        identity.check_bounds(a)?;
        identity.check_bounds(b)?;
        if a == b {
            return Ok(());
        }
        for column in columns.iter_mut() {
            column.swap_rows(a, b)?;
        }
        identity.swap(a, b)
    }

    /// Remove a row by moving it to the last slot and truncating every column.
    ///
    /// The row that previously occupied the last slot takes over the removed row's
    /// slot; its id is unchanged. Removed ids are never reissued.
    fn remove(&mut self, id: RowId) -> SoaResult<()> {
        let idx = self.idx_of(id).ok_or(SoaError::UnknownRow { id: id.0 })?;
        let last = self.len() - 1;
        self.swap(idx, last)?;
        let (identity, mut columns) = self.parts_mut();
        for column in columns.iter_mut() {
            column.truncate(last);
        }
        identity.pop();
        log::trace!(
            "[{}] Removed row {} from slot {} ({} rows left)",
            Self::NAME,
            id.0,
            idx,
            last
        );
        Ok(())
    }

    /// Drop every row; ids issued so far stay retired
    fn clear(&mut self) {
        let (identity, mut columns) = self.parts_mut();
        for column in columns.iter_mut() {
            column.clear();
        }
        identity.clear();
    }

    fn invariant_report(&self) -> InvariantReport {
        invariants::inspect(self.identity(), &self.erased_columns())
    }

    /// True when all columns match the identity table length and every slot
    /// round-trips through the index map
    fn check_invariants(&self) -> bool {
        self.invariant_report().is_ok()
    }

    fn validate(&self) -> SoaResult<()> {
        self.invariant_report().into_result()
    }

    /// Copy row `idx` out through a value view
    fn fetch<V: FetchView<Store = Self>>(&self, idx: RowIdx) -> SoaResult<V> {
        V::project(self, idx)
    }

    fn fetch_id<V: FetchView<Store = Self>>(&self, id: RowId) -> SoaResult<V> {
        let idx = self.idx_of(id).ok_or(SoaError::UnknownRow { id: id.0 })?;
        self.fetch(idx)
    }

    /// Borrow row `idx` through a reference view.
    ///
    /// The view holds the store's exclusive borrow, so nothing can reorder or resize the
    /// store while it is alive.
    fn ref_fetch<'a, V: RefView<'a, Store = Self>>(&'a mut self, idx: RowIdx) -> SoaResult<V> {
        let (_, columns) = self.parts_mut();
        let mut borrows = ColumnBorrows::new(V::NAME, columns);
        V::project(&mut borrows, idx)
    }

    fn ref_fetch_id<'a, V: RefView<'a, Store = Self>>(&'a mut self, id: RowId) -> SoaResult<V> {
        let idx = self.idx_of(id).ok_or(SoaError::UnknownRow { id: id.0 })?;
        self.ref_fetch(idx)
    }
}

/// Static association between a column marker type and a store field
pub trait ColumnOf<S: SoaStorage>: 'static {
    type Elem: 'static;
    const NAME: &'static str;
    /// Declaration position within the store
    const ORDINAL: usize;

    fn column(store: &S) -> &Column<Self::Elem>;
    fn column_mut(store: &mut S) -> &mut Column<Self::Elem>;

    /// Claim this column out of a set of disjoint borrows
    fn take<'a>(borrows: &mut ColumnBorrows<'a>) -> SoaResult<&'a mut Column<Self::Elem>> {
        borrows.take::<Self::Elem>(Self::ORDINAL, Self::NAME)
    }
}

/// Disjoint mutable borrows of a store's columns, handed out at most once each
pub struct ColumnBorrows<'a> {
    view: &'static str,
    columns: Vec<Option<&'a mut dyn ErasedColumn>>,
}

impl<'a> ColumnBorrows<'a> {
    pub fn new(view: &'static str, columns: Vec<&'a mut dyn ErasedColumn>) -> Self {
        Self {
            view,
            columns: columns.into_iter().map(Some).collect(),
        }
    }

    pub fn take<T: 'static>(
        &mut self,
        ordinal: usize,
        name: &'static str,
    ) -> SoaResult<&'a mut Column<T>> {
        let column = self
            .columns
            .get_mut(ordinal)
            .and_then(Option::take)
            .ok_or(SoaError::ColumnAliased {
                column: name,
                view: self.view,
            })?;
        column
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .ok_or_else(|| SoaError::InvariantViolation {
                details: format!("column '{}' has an unexpected element type", name),
            })
    }
}
