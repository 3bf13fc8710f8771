use std::fmt;

/// Reserved browse-level child exposing the files matching the
/// accumulated filter.
pub const CONTENT_DIR: &str = "@";
/// Reserved browse-level child accepting cross-directory renames without
/// enumerating contents.
pub const RENAME_RECEIVER_DIR: &str = "@@";
/// Reserved browse-level component negating the component that follows it.
pub const NEGATION_DIR: &str = "_";

/// The `/`-separated tag components accumulated while descending the
/// browse subtree, excluding the trailing `@`/`@@` terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagPath(String);

impl TagPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, component: &str) -> TagPath {
        if self.0.is_empty() {
            TagPath(component.to_string())
        } else {
            TagPath(format!("{}/{}", self.0, component))
        }
    }

    pub fn last_component(&self) -> Option<&str> {
        self.components().last()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Walks the components left to right, splitting them into the positive
    /// and negative filter sets. `_` flags the next component as negative
    /// and is itself never part of either set.
    pub fn split(&self) -> (Vec<String>, Vec<String>) {
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        let mut negating = false;
        for component in self.components() {
            if negating {
                negative.push(component.to_string());
                negating = false;
            } else if component == NEGATION_DIR {
                negating = true;
            } else {
                positive.push(component.to_string());
            }
        }
        (positive, negative)
    }

    pub fn positive(&self) -> Vec<String> {
        self.split().0
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
