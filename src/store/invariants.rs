//! Read-only invariant diagnostics
//!
//! Never called on a hot path. Tests and debugging code use it to confirm that a
//! sequence of mutations left every column in lockstep with the identity table.

use crate::error::{SoaError, SoaResult};
use crate::store::column::ErasedColumn;
use crate::store::identity::IdentityTable;
use crate::store::{RowId, RowIdx};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A column's length differs from the identity table's
    LengthMismatch {
        column: &'static str,
        len: usize,
        expected: usize,
    },
    /// The id in a slot has no index map entry at all
    UnmappedId { idx: RowIdx, id: RowId },
    /// The index map sends the id in `idx` somewhere else
    BrokenRoundTrip {
        idx: RowIdx,
        id: RowId,
        mapped: RowIdx,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::LengthMismatch {
                column,
                len,
                expected,
            } => write!(f, "column '{}' has {} rows, expected {}", column, len, expected),
            Violation::UnmappedId { idx, id } => {
                write!(f, "slot {} holds id {} with no index entry", idx, id.0)
            }
            Violation::BrokenRoundTrip { idx, id, mapped } => write!(
                f,
                "slot {} holds id {} but the index map points at {}",
                idx, id.0, mapped
            ),
        }
    }
}

/// Outcome of a full invariant scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvariantReport {
    pub rows: usize,
    pub violations: Vec<Violation>,
}

impl InvariantReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_result(self) -> SoaResult<()> {
        if self.is_ok() {
            return Ok(());
        }
        let details = self
            .violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(SoaError::InvariantViolation { details })
    }
}

/// O(N) scan of the length and round-trip invariants
pub fn inspect(identity: &IdentityTable, columns: &[&dyn ErasedColumn]) -> InvariantReport {
    let rows = identity.len();
    let mut violations = Vec::new();

    for column in columns {
        if column.len() != rows {
            violations.push(Violation::LengthMismatch {
                column: column.name(),
                len: column.len(),
                expected: rows,
            });
        }
    }

    let index = identity.index_map();
    for (idx, &id) in identity.ids().iter().enumerate() {
        match index.get(id.0 as usize) {
            None => violations.push(Violation::UnmappedId { idx, id }),
            Some(&mapped) if mapped != idx => {
                violations.push(Violation::BrokenRoundTrip { idx, id, mapped })
            }
            Some(_) => {}
        }
    }

    if !violations.is_empty() {
        log::trace!(
            "[Invariants] {} violation(s) across {} rows",
            violations.len(),
            rows
        );
    }

    InvariantReport { rows, violations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::column::Column;

    #[test]
    fn test_detects_length_mismatch() {
        let identity = IdentityTable::seeded(1);
        let breadth = Column::from_vec("breadth", vec![6, 8]);
        let report = inspect(&identity, &[&breadth]);
        assert_eq!(
            report.violations,
            vec![Violation::LengthMismatch {
                column: "breadth",
                len: 2,
                expected: 1
            }]
        );
        assert!(matches!(
            report.into_result(),
            Err(SoaError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_detects_broken_round_trip() {
        let identity = IdentityTable::from_raw(vec![RowId(0), RowId(1)], vec![1, 0]);
        let report = inspect(&identity, &[]);
        assert_eq!(report.violations.len(), 2);
        assert!(matches!(
            report.violations[0],
            Violation::BrokenRoundTrip { idx: 0, mapped: 1, .. }
        ));
    }

    #[test]
    fn test_detects_unmapped_id() {
        let identity = IdentityTable::from_raw(vec![RowId(5)], vec![0]);
        let report = inspect(&identity, &[]);
        assert_eq!(
            report.violations,
            vec![Violation::UnmappedId { idx: 0, id: RowId(5) }]
        );
    }
}
