use std::collections::BTreeSet;

/// Listing bounds for tag and repository enumeration.
///
/// Names are ordered by byte value. `last` is an exclusive lower bound and
/// need not name an existing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum number of names to return. `None` returns everything.
    pub limit: Option<usize>,

    /// Only names strictly greater than this one are returned.
    pub last: Option<String>,
}

impl ListOptions {
    /// Options that return every name.
    pub fn all() -> Self {
        Self::default()
    }

    /// Set the maximum number of names to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the exclusive cursor.
    pub fn after(mut self, last: impl Into<String>) -> Self {
        self.last = Some(last.into());
        self
    }

    /// Sort, dedupe and window a set of names.
    pub fn apply<I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let sorted: BTreeSet<String> = names.into_iter().collect();
        let after = sorted.into_iter().filter(|name| match &self.last {
            Some(last) => name.as_str() > last.as_str(),
            None => true,
        });

        match self.limit {
            Some(limit) => after.take(limit).collect(),
            None => after.collect(),
        }
    }
}
