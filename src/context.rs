//! Caller-supplied query context and table references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema used when the caller's data source does not name one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Geometry column used when the caller's data source does not name one.
pub const DEFAULT_GEOM_COLUMN: &str = "geom";

/// Table name substituted into the prompt when no table was resolved.
pub const UNKNOWN_TABLE: &str = "public.UNKNOWN_TABLE";

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    /// Creates a new table reference.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses `schema.table` or a bare `table` (which lands in `public`).
    pub fn parse(qualified: &str) -> Option<Self> {
        let qualified = qualified.trim();
        match qualified.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Some(Self::new(schema, name))
            }
            Some(_) => None,
            None if qualified.is_empty() => None,
            None => Some(Self::new(DEFAULT_SCHEMA, qualified)),
        }
    }

    /// Returns the qualified name, e.g. `public.analysis_result`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl Default for TableRef {
    /// The fixed result table of the reference deployment.
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA, "analysis_result")
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Everything the pipeline knows about one request.
///
/// Built once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    pub question: String,
    pub schema: String,
    pub table: String,
    #[serde(rename = "geom")]
    pub geom_column: String,
}

impl QueryContext {
    /// Creates a context, filling blank schema/geometry fields with defaults.
    pub fn new(
        question: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        geom_column: impl Into<String>,
    ) -> Self {
        let schema = schema.into();
        let geom_column = geom_column.into();
        Self {
            question: question.into().trim().to_string(),
            schema: non_blank_or(schema, DEFAULT_SCHEMA),
            table: table.into().trim().to_string(),
            geom_column: non_blank_or(geom_column, DEFAULT_GEOM_COLUMN),
        }
    }

    /// Returns the bound table as `schema.table`, or the sentinel when unresolved.
    pub fn full_table(&self) -> String {
        if self.table.is_empty() {
            UNKNOWN_TABLE.to_string()
        } else {
            format!("{}.{}", self.schema, self.table)
        }
    }

    /// Returns the bound table as a reference.
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table)
    }
}

fn non_blank_or(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults_blank_fields() {
        let ctx = QueryContext::new("parcels near rivers", "", "parcels", "  ");
        assert_eq!(ctx.schema, "public");
        assert_eq!(ctx.geom_column, "geom");
        assert_eq!(ctx.full_table(), "public.parcels");
    }

    #[test]
    fn test_context_keeps_explicit_fields() {
        let ctx = QueryContext::new("q", "cadastre", "lots", "the_geom");
        assert_eq!(ctx.full_table(), "cadastre.lots");
        assert_eq!(ctx.geom_column, "the_geom");
        assert_eq!(ctx.table_ref(), TableRef::new("cadastre", "lots"));
    }

    #[test]
    fn test_empty_table_uses_sentinel() {
        let ctx = QueryContext::new("q", "public", "", "geom");
        assert_eq!(ctx.full_table(), UNKNOWN_TABLE);
    }

    #[test]
    fn test_context_serializes_geom_field_name() {
        let ctx = QueryContext::new("q", "public", "parcels", "geom");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["geom"], "geom");
        assert_eq!(json["table"], "parcels");
    }

    #[test]
    fn test_table_ref_parse() {
        assert_eq!(
            TableRef::parse("public.analysis_result"),
            Some(TableRef::new("public", "analysis_result"))
        );
        assert_eq!(
            TableRef::parse("results"),
            Some(TableRef::new("public", "results"))
        );
        assert_eq!(TableRef::parse(""), None);
        assert_eq!(TableRef::parse(".x"), None);
    }

    #[test]
    fn test_table_ref_default_is_analysis_result() {
        assert_eq!(TableRef::default().to_string(), "public.analysis_result");
    }
}
