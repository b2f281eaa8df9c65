use std::{fmt::Display, sync::Arc};

/// How records are spread over destination tables
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Tables are split between the workers, each worker writes to its own range
    #[default]
    Multi,
    /// Every worker writes to the same table
    Single,
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi" => Ok(Self::Multi),
            "single" => Ok(Self::Single),
            _ => Err(format!(
                "unrecognized mode value: {s}, required to be either multi or single"
            )),
        }
    }
}

impl Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multi => write!(f, "multi"),
            Self::Single => write!(f, "single"),
        }
    }
}

/// The database and the destination tables a run writes to and reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    database: String,
    tables: Vec<Arc<str>>,
}

impl TableLayout {
    /// Build the layout for `mode`
    ///
    /// Multi mode names `table_count` tables `{prefix}0..{prefix}{table_count - 1}`, single
    /// mode uses only `single_table`.
    pub fn new(
        database: impl Into<String>,
        mode: WriteMode,
        prefix: &str,
        single_table: &str,
        table_count: usize,
    ) -> Self {
        let tables = match mode {
            WriteMode::Multi => (0..table_count)
                .map(|i| Arc::from(format!("{prefix}{i}")))
                .collect(),
            WriteMode::Single => vec![Arc::from(single_table)],
        };
        Self {
            database: database.into(),
            tables,
        }
    }

    /// A layout holding exactly one table
    pub fn single(database: impl Into<String>, table: &str) -> Self {
        Self {
            database: database.into(),
            tables: vec![Arc::from(table)],
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn tables(&self) -> &[Arc<str>] {
        &self.tables
    }

    /// `database.table`
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{table}", self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_layout_names_tables_with_prefix() {
        let layout = TableLayout::new("test", WriteMode::Multi, "d", "ignored", 3);
        let names: Vec<&str> = layout.tables().iter().map(|t| t.as_ref()).collect();
        assert_eq!(names, ["d0", "d1", "d2"]);
        assert_eq!(layout.qualified("d1"), "test.d1");
    }

    #[test]
    fn single_layout_uses_one_table() {
        let layout = TableLayout::new("test", WriteMode::Single, "d", "meters_0", 12);
        assert_eq!(layout.tables().len(), 1);
        assert_eq!(layout.tables()[0].as_ref(), "meters_0");
    }

    #[test]
    fn parse_write_mode() {
        assert_eq!("multi".parse::<WriteMode>().unwrap(), WriteMode::Multi);
        assert_eq!("single".parse::<WriteMode>().unwrap(), WriteMode::Single);
        assert!("both".parse::<WriteMode>().is_err());
    }
}
