//! Statement validation for generated SQL.
//!
//! Model output is untrusted. Before anything reaches the database it must
//! pass a closed rule set: one `CREATE TABLE ... AS SELECT` statement bound to
//! the caller's table, with a single `geom` output, an identifier column, and
//! none of the malformed spatial constructs models tend to produce. Each rule
//! has its own [`RejectionReason`] so failures stay diagnosable.

mod lexer;
mod validator;

pub use validator::{projected_columns, StatementValidator};

use std::fmt;
use thiserror::Error;

/// Alias every validated statement gives its geometry output column.
pub const RESULT_GEOMETRY_ALIAS: &str = "geom";

/// Tag of the rule a candidate statement violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Not exactly one `CREATE TABLE <result> AS SELECT` statement.
    NotCreateTableAsSelect,
    /// The select list projects `*`.
    WildcardSelect,
    /// Not exactly one geometry output column named `geom`.
    GeometryAliasViolation,
    /// `gid` redeclared, or no usable identifier column.
    IdentifierCollision,
    /// Geometry accessed as a field of a record, e.g. `(geom).geom`.
    CompositeGeometryAccess,
    /// A spatial predicate used as an output column.
    PredicateProjected,
    /// The base relation is not the caller's table.
    BaseTableMismatch,
    /// A spatial function argument is a subquery that may return many rows.
    UnsafeSubqueryArgument,
    /// `LATERAL` joins are not supported.
    UnsupportedJoinForm,
    /// A spatial predicate has the wrong number or kind of arguments.
    PredicateArityViolation,
    /// A spatial predicate expresses the wrong relationship.
    PredicateMisuse,
    /// More output columns than the configured ceiling allows.
    ExtraneousColumns,
}

impl RejectionReason {
    /// Returns the stable tag name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCreateTableAsSelect => "NotCreateTableAsSelect",
            Self::WildcardSelect => "WildcardSelect",
            Self::GeometryAliasViolation => "GeometryAliasViolation",
            Self::IdentifierCollision => "IdentifierCollision",
            Self::CompositeGeometryAccess => "CompositeGeometryAccess",
            Self::PredicateProjected => "PredicateProjected",
            Self::BaseTableMismatch => "BaseTableMismatch",
            Self::UnsafeSubqueryArgument => "UnsafeSubqueryArgument",
            Self::UnsupportedJoinForm => "UnsupportedJoinForm",
            Self::PredicateArityViolation => "PredicateArityViolation",
            Self::PredicateMisuse => "PredicateMisuse",
            Self::ExtraneousColumns => "ExtraneousColumns",
        }
    }

    /// Returns the number of the validation rule this tag belongs to.
    pub fn rule(&self) -> u8 {
        match self {
            Self::NotCreateTableAsSelect => 1,
            Self::WildcardSelect => 2,
            Self::GeometryAliasViolation => 3,
            Self::IdentifierCollision => 4,
            Self::CompositeGeometryAccess => 5,
            Self::PredicateProjected => 6,
            Self::BaseTableMismatch => 7,
            Self::UnsafeSubqueryArgument => 8,
            Self::UnsupportedJoinForm => 9,
            Self::PredicateArityViolation | Self::PredicateMisuse => 10,
            Self::ExtraneousColumns => 11,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate statement that failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {detail}")]
pub struct Rejection {
    /// The first rule violated.
    pub reason: RejectionReason,
    /// Human-readable explanation of the violation.
    pub detail: String,
    /// The offending candidate text, for the operator to inspect.
    pub candidate: String,
}

impl Rejection {
    pub(crate) fn new(
        reason: RejectionReason,
        detail: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            reason,
            detail: detail.into(),
            candidate: candidate.into(),
        }
    }
}

/// The identifier column a result table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierColumn {
    /// A `gid` column, when the source table has none of its own.
    Gid,
    /// A synthesized `result_id`, typically `row_number() OVER ()::integer`.
    ResultId,
}

impl IdentifierColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gid => "gid",
            Self::ResultId => "result_id",
        }
    }
}

impl fmt::Display for IdentifierColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement that passed every validation rule.
///
/// Only the validator creates these, and materialization consumes them by
/// value, so a statement is executed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
    identifier_column: IdentifierColumn,
    output_columns: Vec<String>,
    warnings: Vec<String>,
}

impl ValidatedStatement {
    /// Returns the normalized statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the geometry output alias (always `geom`).
    pub fn result_alias(&self) -> &'static str {
        RESULT_GEOMETRY_ALIAS
    }

    /// Returns the identifier column the result table will carry.
    pub fn identifier_column(&self) -> IdentifierColumn {
        self.identifier_column
    }

    /// Returns the output column names in select-list order.
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Returns advisory warnings (columns the question did not ask for).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Consumes the statement, returning its text.
    pub fn into_sql(self) -> String {
        self.sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display_is_tag() {
        assert_eq!(RejectionReason::WildcardSelect.to_string(), "WildcardSelect");
        assert_eq!(
            RejectionReason::BaseTableMismatch.to_string(),
            "BaseTableMismatch"
        );
    }

    #[test]
    fn test_reason_rule_numbers() {
        assert_eq!(RejectionReason::NotCreateTableAsSelect.rule(), 1);
        assert_eq!(RejectionReason::PredicateArityViolation.rule(), 10);
        assert_eq!(RejectionReason::PredicateMisuse.rule(), 10);
        assert_eq!(RejectionReason::ExtraneousColumns.rule(), 11);
    }

    #[test]
    fn test_rejection_display() {
        let rejection = Rejection::new(
            RejectionReason::UnsupportedJoinForm,
            "LATERAL joins are not supported",
            "CREATE TABLE ...",
        );
        assert_eq!(
            rejection.to_string(),
            "UnsupportedJoinForm: LATERAL joins are not supported"
        );
        assert_eq!(rejection.candidate, "CREATE TABLE ...");
    }

    #[test]
    fn test_identifier_column_names() {
        assert_eq!(IdentifierColumn::Gid.as_str(), "gid");
        assert_eq!(IdentifierColumn::ResultId.to_string(), "result_id");
    }
}
