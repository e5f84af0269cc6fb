use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::error::ClosureTreeError;
use crate::traits::ClosureTreeModel;

/// Maintains the `(ancestor, descendant, generations)` rows of the closure table.
///
/// Rows are derived from parent links and are only ever written as a side
/// effect of repository mutations. Nothing here touches sibling order.
pub struct HierarchyStore<M>
where
    M: ClosureTreeModel,
{
    _marker: PhantomData<M>,
}

impl<M> Default for HierarchyStore<M>
where
    M: ClosureTreeModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> HierarchyStore<M>
where
    M: ClosureTreeModel,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Writes the reflexive row plus one row per ancestor of `parent_id`.
    pub async fn insert_for_new_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
        parent_id: Option<&M::Id>,
    ) -> Result<(), ClosureTreeError> {
        let mut rows = vec![M::hierarchy_build_row(
            node_id.clone(),
            node_id.clone(),
            0,
        )];

        if let Some(parent_id) = parent_id {
            for (ancestor_id, generations) in self.ancestor_chain(conn, parent_id).await? {
                rows.push(M::hierarchy_build_row(
                    ancestor_id,
                    node_id.clone(),
                    generations + 1,
                ));
            }
        }

        M::HierarchyEntity::insert_many(rows)
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    /// Ancestor ids ordered by distance, the node itself first.
    pub async fn ancestors_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M::Id>, ClosureTreeError> {
        let chain = self.ancestor_chain(conn, id).await?;
        Ok(chain.into_iter().map(|(ancestor, _)| ancestor).collect())
    }

    /// Ids strictly below `id`, in no particular order.
    pub async fn descendants_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<HashSet<M::Id>, ClosureTreeError> {
        let rows = M::HierarchyEntity::find()
            .filter(M::hierarchy_ancestor_column().eq(M::hierarchy_id_to_value(id)))
            .filter(M::hierarchy_generations_column().gt(0))
            .all(conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| M::hierarchy_model_descendant(row))
            .collect())
    }

    /// Every member of the subtree rooted at `id` with its distance from `id`.
    pub async fn subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<(M::Id, i32)>, ClosureTreeError> {
        let rows = M::HierarchyEntity::find()
            .filter(M::hierarchy_ancestor_column().eq(M::hierarchy_id_to_value(id)))
            .order_by_asc(M::hierarchy_generations_column())
            .all(conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    M::hierarchy_model_descendant(row),
                    M::hierarchy_model_generations(row),
                )
            })
            .collect())
    }

    /// All rows whose ancestor or descendant lies in the subtree of `root_id`.
    pub async fn edges_for_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        root_id: &M::Id,
    ) -> Result<Vec<M::HierarchyModel>, ClosureTreeError> {
        let members = self.subtree(conn, root_id).await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let rows = M::HierarchyEntity::find()
            .filter(Self::touching(members.iter().map(|(id, _)| id)))
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Re-hangs the subtree of `node_id` beneath `new_parent_id`.
    ///
    /// Only boundary rows change: rows pairing a former ancestor with a
    /// subtree member are removed and the new ancestor chain is crossed with
    /// every member. Rows internal to the subtree keep their offsets.
    pub async fn rebuild_edges_on_attach<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
        new_parent_id: Option<&M::Id>,
    ) -> Result<(), ClosureTreeError> {
        let members = self.subtree(conn, node_id).await?;
        if members.is_empty() {
            return Err(ClosureTreeError::invariant(format!(
                "node {node_id:?} has no reflexive hierarchy row"
            )));
        }

        let former_ancestors = self
            .ancestor_chain(conn, node_id)
            .await?
            .into_iter()
            .filter(|(_, generations)| *generations > 0)
            .map(|(ancestor, _)| M::hierarchy_id_to_value(&ancestor))
            .collect::<Vec<_>>();

        if !former_ancestors.is_empty() {
            let member_values = members
                .iter()
                .map(|(id, _)| M::hierarchy_id_to_value(id))
                .collect::<Vec<_>>();
            M::HierarchyEntity::delete_many()
                .filter(M::hierarchy_descendant_column().is_in(member_values))
                .filter(M::hierarchy_ancestor_column().is_in(former_ancestors))
                .exec(conn)
                .await?;
        }

        let Some(new_parent_id) = new_parent_id else {
            return Ok(());
        };

        let chain = self.ancestor_chain(conn, new_parent_id).await?;
        let mut rows = Vec::with_capacity(chain.len() * members.len());
        for (ancestor_id, generations) in &chain {
            for (member_id, offset) in &members {
                rows.push(M::hierarchy_build_row(
                    ancestor_id.clone(),
                    member_id.clone(),
                    generations + offset + 1,
                ));
            }
        }

        if !rows.is_empty() {
            M::HierarchyEntity::insert_many(rows)
                .exec_without_returning(conn)
                .await?;
        }
        Ok(())
    }

    /// Removes every row touching the subtree and returns the subtree ids,
    /// root first.
    pub async fn delete_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node_id: &M::Id,
    ) -> Result<Vec<M::Id>, ClosureTreeError> {
        let members = self
            .subtree(conn, node_id)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        if members.is_empty() {
            return Ok(members);
        }

        M::HierarchyEntity::delete_many()
            .filter(Self::touching(members.iter()))
            .exec(conn)
            .await?;
        Ok(members)
    }

    /// Whether `ancestor` sits at least `min_generations` above `descendant`.
    pub async fn is_related<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &M::Id,
        descendant: &M::Id,
        min_generations: i32,
    ) -> Result<bool, ClosureTreeError> {
        let row = M::HierarchyEntity::find()
            .filter(M::hierarchy_ancestor_column().eq(M::hierarchy_id_to_value(ancestor)))
            .filter(M::hierarchy_descendant_column().eq(M::hierarchy_id_to_value(descendant)))
            .filter(M::hierarchy_generations_column().gte(min_generations))
            .one(conn)
            .await?;
        Ok(row.is_some())
    }

    /// Replaces the whole table with the closure of the given parent links.
    pub(crate) async fn regenerate<C: ConnectionTrait>(
        &self,
        conn: &C,
        links: &[(M::Id, Option<M::Id>)],
    ) -> Result<usize, ClosureTreeError> {
        let parents: HashMap<&M::Id, Option<&M::Id>> = links
            .iter()
            .map(|(id, parent)| (id, parent.as_ref()))
            .collect();

        let mut rows = Vec::new();
        for (id, _) in links {
            let mut generations = 0;
            let mut cursor = Some(id);
            while let Some(current) = cursor {
                if generations as usize > links.len() {
                    return Err(ClosureTreeError::invariant(format!(
                        "parent links above {id:?} form a cycle"
                    )));
                }
                rows.push(M::hierarchy_build_row(
                    current.clone(),
                    id.clone(),
                    generations,
                ));
                generations += 1;
                cursor = match parents.get(current) {
                    Some(parent) => *parent,
                    None => {
                        return Err(ClosureTreeError::not_found(current));
                    }
                };
            }
        }

        M::HierarchyEntity::delete_many().exec(conn).await?;
        let written = rows.len();
        // Keep each statement well under the bind-parameter limits.
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk = rows.by_ref().take(250).collect::<Vec<_>>();
            M::HierarchyEntity::insert_many(chunk)
                .exec_without_returning(conn)
                .await?;
        }
        Ok(written)
    }

    async fn ancestor_chain<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<(M::Id, i32)>, ClosureTreeError> {
        let rows = M::HierarchyEntity::find()
            .filter(M::hierarchy_descendant_column().eq(M::hierarchy_id_to_value(id)))
            .order_by_asc(M::hierarchy_generations_column())
            .all(conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    M::hierarchy_model_ancestor(row),
                    M::hierarchy_model_generations(row),
                )
            })
            .collect())
    }

    fn touching<'a>(ids: impl Iterator<Item = &'a M::Id>) -> Condition {
        let values = ids.map(M::hierarchy_id_to_value).collect::<Vec<_>>();
        Condition::any()
            .add(M::hierarchy_ancestor_column().is_in(values.clone()))
            .add(M::hierarchy_descendant_column().is_in(values))
    }
}
