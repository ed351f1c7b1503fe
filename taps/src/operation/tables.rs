use std::collections::BTreeSet;

use regex::Regex;

use crate::error::TapsResult;

/// Selects the tables an operation transfers.
///
/// The inclusion pattern is matched anywhere in the table name. Exclusions are exact names.
/// When both are given a table has to pass both.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include: Option<Regex>,
    exclude: BTreeSet<String>,
}

impl TableFilter {
    pub fn new(include: Option<&str>, exclude: &[String]) -> TapsResult<Self> {
        let include = include.map(Regex::new).transpose()?;

        Ok(Self {
            include,
            exclude: exclude.iter().cloned().collect(),
        })
    }

    /// Builds an inclusion pattern matching exactly the given table names.
    pub fn pattern_for_tables(tables: &[String]) -> String {
        let alternatives = tables
            .iter()
            .map(|table| regex::escape(table.trim()))
            .collect::<Vec<_>>()
            .join("|");

        format!("^({alternatives})$")
    }

    pub fn matches(&self, table: &str) -> bool {
        if self.exclude.contains(table) {
            return false;
        }

        self.include
            .as_ref()
            .is_none_or(|include| include.is_match(table))
    }

    /// Returns the tables still to transfer, keeping the input order.
    pub fn apply<I>(&self, tables: I, completed: &BTreeSet<String>) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        tables
            .into_iter()
            .filter(|table| !completed.contains(table) && self.matches(table))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn tables() -> Vec<String> {
        ["a", "b", "c", "d"].into_iter().map(String::from).collect()
    }

    #[test]
    fn include_pattern() {
        let filter = TableFilter::new(Some("a|c"), &[]).unwrap();
        assert_eq!(filter.apply(tables(), &BTreeSet::new()), vec!["a", "c"]);
    }

    #[test]
    fn exclude_list() {
        let filter = TableFilter::new(None, &["b".to_string()]).unwrap();
        assert_eq!(
            filter.apply(tables(), &BTreeSet::new()),
            vec!["a", "c", "d"]
        );
    }

    #[test]
    fn include_and_exclude_intersect() {
        let filter = TableFilter::new(Some("a|b|c"), &["b".to_string()]).unwrap();
        assert_eq!(filter.apply(tables(), &BTreeSet::new()), vec!["a", "c"]);
    }

    #[test]
    fn completed_tables_are_skipped() {
        let filter = TableFilter::new(Some("a|c"), &[]).unwrap();
        let completed = BTreeSet::from(["a".to_string()]);
        assert_eq!(filter.apply(tables(), &completed), vec!["c"]);
    }

    #[test]
    fn exact_table_patterns() {
        let tables = ["users".to_string(), "order.items".to_string()];
        let pattern = TableFilter::pattern_for_tables(&tables);
        let filter = TableFilter::new(Some(&pattern), &[]).unwrap();

        assert!(filter.matches("users"));
        assert!(filter.matches("order.items"));
        assert!(!filter.matches("users_archive"));
        assert!(!filter.matches("order_items"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = TableFilter::new(Some("("), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
