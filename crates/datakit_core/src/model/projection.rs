//! Column projection for repository reads.

/// Columns requested by the next repository query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl Projection {
    /// Builds a projection; an empty list or any `*` entry means all columns.
    pub fn columns<S: AsRef<str>>(columns: &[S]) -> Self {
        if columns.is_empty() || columns.iter().any(|column| column.as_ref().trim() == "*") {
            return Self::All;
        }
        Self::Columns(
            columns
                .iter()
                .map(|column| column.as_ref().trim().to_string())
                .collect(),
        )
    }

    /// Resolves the column list for a query, prepending `primary_key` when an
    /// explicit list omits it. `None` selects all columns.
    pub fn resolve(&self, primary_key: &str) -> Option<Vec<String>> {
        match self {
            Self::All => None,
            Self::Columns(columns) => {
                let mut resolved = columns.clone();
                if !resolved.iter().any(|column| column == primary_key) {
                    resolved.insert(0, primary_key.to_string());
                }
                Some(resolved)
            }
        }
    }
}
