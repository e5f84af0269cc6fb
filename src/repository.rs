use std::collections::HashSet;
use std::fmt;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};

use crate::config::{ClosureTreeConfig, DependentBehavior};
use crate::error::ClosureTreeError;
use crate::hierarchy::HierarchyStore;
use crate::lock::{ensure_supported, LockedTransaction};
use crate::order::OrderAllocator;
use crate::traits::ClosureTreeModel;

/// A node handed to a placement operation.
///
/// `Unattached` nodes are inserted; `Persisted` nodes are moved together with
/// their subtree.
pub enum Attachable<M>
where
    M: ClosureTreeModel,
{
    Unattached(M::ActiveModel),
    Persisted(M::Id),
}

impl<M> Attachable<M>
where
    M: ClosureTreeModel,
{
    pub fn new(active: M::ActiveModel) -> Self {
        Self::Unattached(active)
    }

    pub fn existing(model: &M) -> Self {
        Self::Persisted(model.id())
    }
}

/// Where `add_child` places the child among its new siblings.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ChildPosition {
    Start,
    #[default]
    End,
}

/// Side of the anchor a new sibling lands on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SiblingPosition {
    Before,
    After,
}

/// Target position inside a sibling group, resolved after the moved node
/// has left its old group.
pub(crate) enum Slot<Id> {
    Start,
    End,
    Before(Id),
    After(Id),
}

/// Repository exposing the higher-level closure-tree operations for a given model.
///
/// Every mutator runs in one [`LockedTransaction`]: the node row, the sibling
/// renumbering and the hierarchy rows are committed together or not at all.
/// Models passed in are only used for their ids; the current rows are
/// re-read inside the transaction, and callers must re-fetch any node a
/// mutation may have touched.
pub struct ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    pub(crate) hierarchy: HierarchyStore<M>,
    pub(crate) order: OrderAllocator<M>,
}

impl<M> fmt::Debug for ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureTreeRepository")
            .field("entity", &self.config().entity_name())
            .field("hierarchy", &self.config().hierarchy_name())
            .field("hierarchy_table", &self.config().hierarchy_table())
            .finish_non_exhaustive()
    }
}

impl<M> Default for ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    pub fn new() -> Self {
        Self {
            hierarchy: HierarchyStore::new(),
            order: OrderAllocator::new(M::order_column()),
        }
    }

    pub(crate) fn config(&self) -> &'static ClosureTreeConfig {
        M::closure_tree_config()
    }

    /// The closure-table store backing this repository.
    pub fn hierarchy(&self) -> &HierarchyStore<M> {
        &self.hierarchy
    }

    /// The sibling-order allocator backing this repository.
    pub fn order(&self) -> &OrderAllocator<M> {
        &self.order
    }

    pub(crate) async fn lock(
        &self,
        conn: &DatabaseConnection,
    ) -> Result<LockedTransaction, ClosureTreeError> {
        ensure_supported(conn)?;
        LockedTransaction::acquire(self.config().advisory_lock_strategy(), conn).await
    }

    /// Inserts a node as the last child of `parent_id`, or as the last root.
    pub async fn create(
        &self,
        conn: &DatabaseConnection,
        active: M::ActiveModel,
        parent_id: Option<&M::Id>,
    ) -> Result<M, ClosureTreeError> {
        let guard = self.lock(conn).await?;
        let result = self
            .place(
                guard.connection(),
                Attachable::Unattached(active),
                parent_id.cloned(),
                Slot::End,
            )
            .await;
        self.conclude(conn, guard, result).await
    }

    /// Inserts or moves `child` beneath `parent`.
    pub async fn add_child(
        &self,
        conn: &DatabaseConnection,
        parent: &M,
        child: Attachable<M>,
        at: ChildPosition,
    ) -> Result<M, ClosureTreeError> {
        let slot = match at {
            ChildPosition::Start => Slot::Start,
            ChildPosition::End => Slot::End,
        };
        let guard = self.lock(conn).await?;
        let result = self
            .place(guard.connection(), child, Some(parent.id()), slot)
            .await;
        self.conclude(conn, guard, result).await
    }

    /// Places `sibling` directly after `anchor`.
    pub async fn append_sibling(
        &self,
        conn: &DatabaseConnection,
        anchor: &M,
        sibling: Attachable<M>,
    ) -> Result<M, ClosureTreeError> {
        self.add_sibling(conn, anchor, sibling, SiblingPosition::After)
            .await
    }

    /// Places `sibling` directly before `anchor`.
    pub async fn prepend_sibling(
        &self,
        conn: &DatabaseConnection,
        anchor: &M,
        sibling: Attachable<M>,
    ) -> Result<M, ClosureTreeError> {
        self.add_sibling(conn, anchor, sibling, SiblingPosition::Before)
            .await
    }

    pub async fn add_sibling(
        &self,
        conn: &DatabaseConnection,
        anchor: &M,
        sibling: Attachable<M>,
        position: SiblingPosition,
    ) -> Result<M, ClosureTreeError> {
        let guard = self.lock(conn).await?;
        let result = self
            .place_beside(guard.connection(), &anchor.id(), sibling, position)
            .await;
        self.conclude(conn, guard, result).await
    }

    /// Detaches `node` with its subtree and appends it to the roots.
    pub async fn move_to_root(
        &self,
        conn: &DatabaseConnection,
        node: &M,
    ) -> Result<M, ClosureTreeError> {
        let guard = self.lock(conn).await?;
        let result = self
            .place(
                guard.connection(),
                Attachable::Persisted(node.id()),
                None,
                Slot::End,
            )
            .await;
        self.conclude(conn, guard, result).await
    }

    /// Destroys `node` according to the configured [`DependentBehavior`] and
    /// returns the number of node rows removed.
    pub async fn destroy(&self, conn: &DatabaseConnection, node: &M) -> Result<u64, ClosureTreeError> {
        let guard = self.lock(conn).await?;
        let result = self.destroy_on(guard.connection(), &node.id()).await;
        self.conclude(conn, guard, result).await
    }

    /// Renumbers one sibling group densely, keeping the current relative
    /// order (ties broken by id). Mutations already do this after an
    /// [`ClosureTreeError::OrderConflict`]; call it after editing order
    /// values out of band.
    pub async fn repair_order(
        &self,
        conn: &DatabaseConnection,
        parent_id: Option<&M::Id>,
    ) -> Result<usize, ClosureTreeError> {
        let guard = self.lock(conn).await?;
        let result = self.order.renumber(guard.connection(), parent_id).await;
        if let Ok(size) = &result {
            tracing::warn!(
                entity = self.config().entity_name(),
                parent = ?parent_id,
                size,
                "renumbered sibling group"
            );
        }
        guard.finish(result).await
    }

    /// Regenerates the whole hierarchy table from parent links and renumbers
    /// every sibling group. Returns the number of hierarchy rows written.
    pub async fn rebuild(&self, conn: &DatabaseConnection) -> Result<usize, ClosureTreeError> {
        let guard = self.lock(conn).await?;
        let result = self.rebuild_on(guard.connection()).await;
        guard.finish(result).await
    }

    /// Commits or rolls back `result`. When an order conflict rolled the
    /// mutation back, the reported group is renumbered in a transaction of
    /// its own and the conflict is still returned; the mutation is not retried.
    pub(crate) async fn conclude<T>(
        &self,
        conn: &DatabaseConnection,
        guard: LockedTransaction,
        result: Result<T, ClosureTreeError>,
    ) -> Result<T, ClosureTreeError> {
        let result = guard.finish(result).await;
        if let Err(ClosureTreeError::OrderConflict { parent, group, .. }) = &result {
            let repaired = async {
                let guard = self.lock(conn).await?;
                let renumbered = self
                    .order
                    .renumber_group(guard.connection(), group.clone())
                    .await;
                guard.finish(renumbered).await
            }
            .await;
            match repaired {
                Ok(size) => tracing::warn!(
                    entity = self.config().entity_name(),
                    parent = %parent,
                    size,
                    "renumbered conflicting sibling group"
                ),
                Err(err) => tracing::error!(
                    entity = self.config().entity_name(),
                    parent = %parent,
                    error = %err,
                    "failed to renumber conflicting sibling group"
                ),
            }
        }
        result
    }

    pub(crate) async fn place<C: ConnectionTrait>(
        &self,
        conn: &C,
        subject: Attachable<M>,
        parent_id: Option<M::Id>,
        slot: Slot<M::Id>,
    ) -> Result<M, ClosureTreeError> {
        if let Some(parent_id) = parent_id.as_ref() {
            self.find_required(conn, parent_id).await?;
        }

        match subject {
            Attachable::Unattached(active) => self.insert_node(conn, active, parent_id, slot).await,
            Attachable::Persisted(id) => self.move_node(conn, &id, parent_id, slot).await,
        }
    }

    async fn place_beside<C: ConnectionTrait>(
        &self,
        conn: &C,
        anchor_id: &M::Id,
        sibling: Attachable<M>,
        position: SiblingPosition,
    ) -> Result<M, ClosureTreeError> {
        if let Attachable::Persisted(id) = &sibling {
            if id == anchor_id {
                return Err(ClosureTreeError::self_sibling(id));
            }
        }

        let anchor = self.find_required(conn, anchor_id).await?;
        let slot = match position {
            SiblingPosition::Before => Slot::Before(anchor.id()),
            SiblingPosition::After => Slot::After(anchor.id()),
        };
        self.place(conn, sibling, anchor.parent_id(), slot).await
    }

    pub(crate) async fn insert_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        mut active: M::ActiveModel,
        parent_id: Option<M::Id>,
        slot: Slot<M::Id>,
    ) -> Result<M, ClosureTreeError> {
        self.order.verify(conn, parent_id.as_ref()).await?;
        let index = self.claim_slot(conn, parent_id.as_ref(), &slot).await?;

        M::set_parent(&mut active, parent_id.clone());
        M::set_order_value(&mut active, index);
        let model = active.insert(conn).await?;

        self.hierarchy
            .insert_for_new_node(conn, &model.id(), parent_id.as_ref())
            .await?;

        tracing::debug!(
            entity = self.config().entity_name(),
            node = ?model.id(),
            parent = ?parent_id,
            index,
            "inserted node"
        );
        Ok(model)
    }

    async fn move_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        parent_id: Option<M::Id>,
        slot: Slot<M::Id>,
    ) -> Result<M, ClosureTreeError> {
        let node = self.find_required(conn, id).await?;

        if let Some(parent_id) = parent_id.as_ref() {
            let chain = self.hierarchy.ancestors_of(conn, parent_id).await?;
            if chain.contains(id) {
                return Err(ClosureTreeError::cycle(id));
            }
        }

        let old_parent = node.parent_id();
        let reparented = old_parent != parent_id;
        self.order.verify(conn, old_parent.as_ref()).await?;
        if reparented {
            self.order.verify(conn, parent_id.as_ref()).await?;
        }

        self.order.park(conn, id).await?;
        self.order
            .remove_and_compact(conn, old_parent.as_ref(), node.order_value())
            .await?;
        let index = self.claim_slot(conn, parent_id.as_ref(), &slot).await?;

        let mut active = node.into_active_model();
        M::set_parent(&mut active, parent_id.clone());
        M::set_order_value(&mut active, index);
        let moved = active.update(conn).await?;

        if reparented {
            self.hierarchy
                .rebuild_edges_on_attach(conn, id, parent_id.as_ref())
                .await?;
        }

        tracing::debug!(
            entity = self.config().entity_name(),
            node = ?id,
            from = ?old_parent,
            to = ?parent_id,
            index,
            "moved node"
        );
        Ok(moved)
    }

    /// Resolves `slot` against the current rows and opens that position.
    async fn claim_slot<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        slot: &Slot<M::Id>,
    ) -> Result<i32, ClosureTreeError> {
        let index = match slot {
            Slot::End => return self.order.next_order_value(conn, parent_id).await,
            Slot::Start => 0,
            Slot::Before(anchor) => self.find_required(conn, anchor).await?.order_value(),
            Slot::After(anchor) => self.find_required(conn, anchor).await?.order_value() + 1,
        };
        self.order.insert_at(conn, parent_id, index).await
    }

    async fn destroy_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<u64, ClosureTreeError> {
        let node = self.find_required(conn, id).await?;
        let parent_id = node.parent_id();
        self.order.verify(conn, parent_id.as_ref()).await?;

        let heir = match self.config().dependent_behavior() {
            DependentBehavior::Destroy => None,
            DependentBehavior::Nullify => Some(None),
            DependentBehavior::Adopt => Some(parent_id.clone()),
        };
        if let Some(heir) = heir {
            for child in self.children_of(conn, id).await? {
                self.move_node(conn, &child.id(), heir.clone(), Slot::End)
                    .await?;
            }
        }

        let removed = self.hierarchy.delete_subtree(conn, id).await?;
        if removed.is_empty() {
            return Err(ClosureTreeError::invariant(format!(
                "node {id:?} has no reflexive hierarchy row"
            )));
        }

        let values = removed.iter().map(M::id_to_value).collect::<Vec<_>>();
        let deleted = M::Entity::delete_many()
            .filter(M::id_column().is_in(values))
            .exec(conn)
            .await?;

        self.order
            .remove_and_compact(conn, parent_id.as_ref(), node.order_value())
            .await?;

        // Cascading foreign keys may have removed descendants already, and
        // not every backend counts those rows.
        let removed_count = removed.len() as u64;
        if deleted.rows_affected > removed_count {
            return Err(ClosureTreeError::invariant(format!(
                "deleting subtree of {id:?} removed {} rows for {removed_count} nodes",
                deleted.rows_affected
            )));
        }

        tracing::debug!(
            entity = self.config().entity_name(),
            node = ?id,
            nodes = removed_count,
            "destroyed node"
        );
        Ok(removed_count)
    }

    async fn rebuild_on<C: ConnectionTrait>(&self, conn: &C) -> Result<usize, ClosureTreeError> {
        let nodes = M::Entity::find()
            .order_by_asc(M::order_column())
            .order_by_asc(M::id_column())
            .all(conn)
            .await?;

        let links = nodes
            .iter()
            .map(|node| (node.id(), node.parent_id()))
            .collect::<Vec<_>>();
        let written = self.hierarchy.regenerate(conn, &links).await?;

        let mut groups = HashSet::new();
        for (_, parent_id) in links {
            if groups.insert(parent_id.clone()) {
                self.order.renumber(conn, parent_id.as_ref()).await?;
            }
        }

        tracing::info!(
            entity = self.config().entity_name(),
            hierarchy = self.config().hierarchy_name(),
            nodes = nodes.len(),
            groups = groups.len(),
            rows = written,
            "rebuilt hierarchy"
        );
        Ok(written)
    }
}
