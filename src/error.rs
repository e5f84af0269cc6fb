use thiserror::Error;

/// Errors returned by the closure-tree APIs.
#[derive(Debug, Error)]
pub enum ClosureTreeError {
    #[error("closure-tree supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("path cannot be empty")]
    EmptyPath,

    /// The requested move would place a node underneath itself.
    #[error("node {node} cannot be moved beneath its own subtree")]
    Cycle { node: String },

    #[error("node {id} does not exist")]
    NotFound { id: String },

    /// A sibling group was found with duplicate or missing order values.
    ///
    /// The mutation is rolled back and the group is then renumbered in its
    /// own transaction, so the caller may retry. `group` holds the parent id
    /// as stored (`None` for the roots).
    #[error("sibling order under {parent} is not dense: found {found:?}")]
    OrderConflict {
        parent: String,
        group: Option<sea_orm::Value>,
        found: Vec<i32>,
    },

    #[error("node {node} cannot be its own sibling")]
    SelfSibling { node: String },

    #[error("closure-tree invariant violation: {0}")]
    Invariant(String),
}

impl ClosureTreeError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub(crate) fn cycle(node: &impl std::fmt::Debug) -> Self {
        Self::Cycle {
            node: format!("{node:?}"),
        }
    }

    pub(crate) fn not_found(id: &impl std::fmt::Debug) -> Self {
        Self::NotFound {
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn self_sibling(node: &impl std::fmt::Debug) -> Self {
        Self::SelfSibling {
            node: format!("{node:?}"),
        }
    }

    pub(crate) fn order_conflict(
        parent: Option<&impl std::fmt::Debug>,
        group: Option<sea_orm::Value>,
        found: Vec<i32>,
    ) -> Self {
        let parent = match parent {
            Some(id) => format!("{id:?}"),
            None => "<roots>".to_string(),
        };
        Self::OrderConflict {
            parent,
            group,
            found,
        }
    }

    /// Whether the error was raised by validation before any write happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyPath | Self::Cycle { .. } | Self::NotFound { .. } | Self::SelfSibling { .. }
        )
    }
}
