//! SeaORM-centric ordered closure tree.
//!
//! Nodes live in one table with a parent pointer, a dense zero-based sibling
//! position and a subtype tag; a second table stores the transitive closure
//! of the parent links. Every structural mutation keeps node rows, sibling
//! order and closure rows consistent inside a single transaction. PostgreSQL
//! and SQLite connections are supported.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod lock;
pub mod order;
mod path;
pub mod repository;
pub mod traits;
pub mod traversal;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{
        AdvisoryLockStrategy, ClosureTreeConfig, ClosureTreeOptions, DependentBehavior,
    };
    pub use crate::repository::{Attachable, ChildPosition, ClosureTreeRepository, SiblingPosition};
    pub use crate::traits::ClosureTreeModel;
    pub use crate::traversal::Subtree;
}

pub use ordered_closure_tree_macros::ClosureTreeModel as ClosureTreeModelDerive;
#[doc(hidden)]
pub use ordered_closure_tree_macros::ClosureTreeModel;
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, ClosureTreeConfig, ClosureTreeOptions,
    DependentBehavior,
};
pub use error::ClosureTreeError;
pub use hierarchy::HierarchyStore;
pub use order::OrderAllocator;
pub use repository::{Attachable, ChildPosition, ClosureTreeRepository, SiblingPosition};
pub use traits::ClosureTreeModel;
pub use traversal::Subtree;
