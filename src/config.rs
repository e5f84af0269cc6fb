use crc32fast::Hasher;

/// Static configuration describing how a SeaORM model integrates with
/// the closure-table hierarchy.
#[derive(Clone, Debug)]
pub struct ClosureTreeConfig {
    entity_name: String,
    hierarchy_name: String,
    table_name: String,
    id_column: String,
    parent_column: String,
    order_column: String,
    type_tag_column: String,
    hierarchy_table: String,
    ancestor_column: String,
    descendant_column: String,
    generations_column: String,
    dependent_behavior: DependentBehavior,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl ClosureTreeConfig {
    /// Create a new configuration using the logical entity and hierarchy names.
    pub fn new(entity_name: impl Into<String>, hierarchy_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let hierarchy_name = hierarchy_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &hierarchy_name,
        ));

        Self {
            table_name: entity_name.to_lowercase(),
            hierarchy_table: format!("{}_hierarchies", entity_name.to_lowercase()),
            entity_name,
            hierarchy_name,
            id_column: "id".to_string(),
            parent_column: "parent_id".to_string(),
            order_column: "order_value".to_string(),
            type_tag_column: "type_tag".to_string(),
            ancestor_column: "ancestor_id".to_string(),
            descendant_column: "descendant_id".to_string(),
            generations_column: "generations".to_string(),
            dependent_behavior: DependentBehavior::default(),
            advisory_lock_strategy: default_lock,
        }
    }

    /// Merge options produced by [`ClosureTreeOptions`].
    pub(crate) fn apply_options(mut self, options: ClosureTreeOptions) -> Self {
        let ClosureTreeOptions {
            table_name,
            id_column,
            parent_column,
            order_column,
            type_tag_column,
            hierarchy_table,
            ancestor_column,
            descendant_column,
            generations_column,
            dependent_behavior,
            advisory_lock_strategy,
        } = options;

        if let Some(value) = table_name {
            self.table_name = value;
        }
        if let Some(value) = id_column {
            self.id_column = value;
        }
        if let Some(value) = parent_column {
            self.parent_column = value;
        }
        if let Some(value) = order_column {
            self.order_column = value;
        }
        if let Some(value) = type_tag_column {
            self.type_tag_column = value;
        }
        if let Some(value) = hierarchy_table {
            self.hierarchy_table = value;
        }
        if let Some(value) = ancestor_column {
            self.ancestor_column = value;
        }
        if let Some(value) = descendant_column {
            self.descendant_column = value;
        }
        if let Some(value) = generations_column {
            self.generations_column = value;
        }
        if let Some(behavior) = dependent_behavior {
            self.dependent_behavior = behavior;
        }
        if let Some(strategy) = advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Human-readable Rust struct name for the base entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Associated SeaORM entity name for the hierarchy model.
    pub fn hierarchy_name(&self) -> &str {
        &self.hierarchy_name
    }

    /// Table holding the node rows.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Column name storing the parent foreign key.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    /// Column storing the dense, zero-based sibling position.
    pub fn order_column(&self) -> &str {
        &self.order_column
    }

    /// Column storing the node subtype tag.
    pub fn type_tag_column(&self) -> &str {
        &self.type_tag_column
    }

    /// Table backing the hierarchy entity.
    pub fn hierarchy_table(&self) -> &str {
        &self.hierarchy_table
    }

    pub fn ancestor_column(&self) -> &str {
        &self.ancestor_column
    }

    pub fn descendant_column(&self) -> &str {
        &self.descendant_column
    }

    pub fn generations_column(&self) -> &str {
        &self.generations_column
    }

    /// Dependent behavior when deleting nodes.
    pub fn dependent_behavior(&self) -> DependentBehavior {
        self.dependent_behavior
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style options consumed by the derive macro.
#[derive(Clone, Debug, Default)]
pub struct ClosureTreeOptions {
    table_name: Option<String>,
    id_column: Option<String>,
    parent_column: Option<String>,
    order_column: Option<String>,
    type_tag_column: Option<String>,
    hierarchy_table: Option<String>,
    ancestor_column: Option<String>,
    descendant_column: Option<String>,
    generations_column: Option<String>,
    dependent_behavior: Option<DependentBehavior>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl ClosureTreeOptions {
    pub fn table_name(mut self, value: impl Into<String>) -> Self {
        self.table_name = Some(value.into());
        self
    }

    pub fn id_column(mut self, value: impl Into<String>) -> Self {
        self.id_column = Some(value.into());
        self
    }

    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent_column = Some(value.into());
        self
    }

    pub fn order_column(mut self, value: impl Into<String>) -> Self {
        self.order_column = Some(value.into());
        self
    }

    pub fn type_tag_column(mut self, value: impl Into<String>) -> Self {
        self.type_tag_column = Some(value.into());
        self
    }

    pub fn hierarchy_table(mut self, value: impl Into<String>) -> Self {
        self.hierarchy_table = Some(value.into());
        self
    }

    pub fn ancestor_column(mut self, value: impl Into<String>) -> Self {
        self.ancestor_column = Some(value.into());
        self
    }

    pub fn descendant_column(mut self, value: impl Into<String>) -> Self {
        self.descendant_column = Some(value.into());
        self
    }

    pub fn generations_column(mut self, value: impl Into<String>) -> Self {
        self.generations_column = Some(value.into());
        self
    }

    pub fn dependent_behavior(mut self, behavior: DependentBehavior) -> Self {
        self.dependent_behavior = Some(behavior);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: ClosureTreeConfig) -> ClosureTreeConfig {
        base.apply_options(self)
    }
}

/// Behaviour to apply to dependent nodes when destroying a record.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DependentBehavior {
    /// Remove the node together with its whole subtree.
    #[default]
    Destroy,
    /// Detach the children; they are appended to the root group.
    Nullify,
    /// Hand the children to the destroyed node's parent (or the roots).
    Adopt,
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, hierarchy: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(hierarchy.as_bytes());
        let crc = hasher.finalize();
        Self(format!("ordered-closure-tree::{entity}::{hierarchy}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_conventional_column_names() {
        let config = ClosureTreeConfig::new("Tag", "TagHierarchy");
        assert_eq!(config.table_name(), "tag");
        assert_eq!(config.hierarchy_table(), "tag_hierarchies");
        assert_eq!(config.order_column(), "order_value");
        assert_eq!(config.type_tag_column(), "type_tag");
        assert_eq!(config.dependent_behavior(), DependentBehavior::Destroy);
    }

    #[test]
    fn options_override_only_what_they_set() {
        let config = ClosureTreeOptions::default()
            .table_name("categories")
            .order_column("position")
            .dependent_behavior(DependentBehavior::Adopt)
            .apply(ClosureTreeConfig::new("Category", "CategoryHierarchy"));

        assert_eq!(config.table_name(), "categories");
        assert_eq!(config.order_column(), "position");
        assert_eq!(config.parent_column(), "parent_id");
        assert_eq!(config.dependent_behavior(), DependentBehavior::Adopt);
    }

    #[test]
    fn derived_lock_key_is_stable_and_namespaced() {
        let first = ClosureTreeConfig::new("Tag", "TagHierarchy");
        let second = ClosureTreeConfig::new("Tag", "TagHierarchy");
        let other = ClosureTreeConfig::new("Label", "LabelHierarchy");

        let key = first.advisory_lock_strategy().key().map(AdvisoryLockKey::as_str);
        assert_eq!(
            key,
            second.advisory_lock_strategy().key().map(AdvisoryLockKey::as_str)
        );
        assert_ne!(
            key,
            other.advisory_lock_strategy().key().map(AdvisoryLockKey::as_str)
        );
        assert!(key.is_some_and(|k| k.starts_with("ordered-closure-tree::Tag::TagHierarchy::")));
    }
}
