//! Column metadata for spatial tables.
//!
//! Only the parts of a table's structure the pipeline reasons about: column
//! names and their PostgreSQL type names.

use serde::{Deserialize, Serialize};

/// A column of an introspected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Underlying type name (`udt_name`), e.g. `int4`, `text`, `geometry`.
    pub data_type: String,
}

impl Column {
    /// Creates a new column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// Returns true if the column holds PostGIS geometry or geography values.
    pub fn is_geometry(&self) -> bool {
        let data_type = self.data_type.to_ascii_lowercase();
        data_type == "geometry" || data_type == "geography"
    }
}

/// Finds a column by name (case-insensitive, as unquoted identifiers fold).
pub fn find_column<'a>(columns: &'a [Column], name: &str) -> Option<&'a Column> {
    columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Formats a column list for log lines, e.g. `gid int4, geom geometry`.
pub fn describe_columns(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.data_type))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_geometry() {
        assert!(Column::new("geom", "geometry").is_geometry());
        assert!(Column::new("shape", "GEOGRAPHY").is_geometry());
        assert!(!Column::new("gid", "int4").is_geometry());
    }

    #[test]
    fn test_find_column_ignores_case() {
        let columns = vec![Column::new("gid", "int4"), Column::new("geom", "geometry")];
        assert_eq!(find_column(&columns, "GID"), Some(&columns[0]));
        assert!(find_column(&columns, "result_id").is_none());
    }

    #[test]
    fn test_describe_columns() {
        let columns = vec![Column::new("gid", "int4"), Column::new("geom", "geometry")];
        assert_eq!(describe_columns(&columns), "gid int4, geom geometry");
        assert_eq!(describe_columns(&[]), "");
    }
}
