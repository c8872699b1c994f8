//! Bounds-checked column storage

use crate::error::{out_of_range, SoaResult};
use crate::store::RowIdx;
use std::any::Any;

/// One field of the store across all rows.
///
/// Every access by slot index is checked against this column's own length, so an
/// out-of-range index is reported for the first column it violates regardless of the
/// other columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Column<T> {
    name: &'static str,
    values: Vec<T>,
}

impl<T> Column<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            values: Vec::new(),
        }
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn from_vec(name: &'static str, values: Vec<T>) -> Self {
        Self { name, values }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn at(&self, idx: RowIdx) -> SoaResult<&T> {
        let len = self.values.len();
        self.values
            .get(idx)
            .ok_or_else(|| out_of_range(self.name, idx, len))
    }

    pub fn at_mut(&mut self, idx: RowIdx) -> SoaResult<&mut T> {
        let len = self.values.len();
        let name = self.name;
        self.values
            .get_mut(idx)
            .ok_or_else(|| out_of_range(name, idx, len))
    }

    /// Append a value to this column only.
    ///
    /// Breaks lockstep with the other columns until they are appended too; use the
    /// store's `push` for whole rows.
    pub fn push(&mut self, value: T) {
        self.values.push(value);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }
}

/// Type-erased view of a column used for lockstep operations
pub trait ErasedColumn: Any {
    fn name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn swap_rows(&mut self, a: RowIdx, b: RowIdx) -> SoaResult<()>;
    fn truncate(&mut self, len: usize);
    fn clear(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedColumn for Column<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn swap_rows(&mut self, a: RowIdx, b: RowIdx) -> SoaResult<()> {
        let len = self.values.len();
        for idx in [a, b] {
            if idx >= len {
                return Err(out_of_range(self.name, idx, len));
            }
        }
        self.values.swap(a, b);
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SoaError;

    #[test]
    fn test_at_reports_own_bounds() {
        let column = Column::from_vec("breadth", vec![6]);
        assert_eq!(*column.at(0).unwrap(), 6);
        assert_eq!(
            column.at(1).unwrap_err(),
            SoaError::OutOfRange {
                column: "breadth",
                index: 1,
                len: 1
            }
        );
    }

    #[test]
    fn test_swap_rows_checks_both_indices() {
        let mut column = Column::from_vec("obj", vec![1, 2, 3]);
        assert!(column.swap_rows(0, 3).is_err());
        assert_eq!(column.as_slice(), &[1, 2, 3]);
        column.swap_rows(0, 2).unwrap();
        assert_eq!(column.as_slice(), &[3, 2, 1]);
    }
}
