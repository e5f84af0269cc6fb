//! Read-side queries over the closure table.
//!
//! Ancestor and descendant projections resolve in a single joined statement
//! whatever the depth of the tree. Preordered projections fetch, in one
//! statement, every member row paired with the order value of each of its
//! ancestors; the root-to-node sequence of those order values is the sort
//! key. Type-tag scopes filter the projection only, never reachability.

use std::collections::HashMap;
use std::hash::Hash;

use sea_orm::sea_query::{Alias, Asterisk, Expr, JoinType, Order, Query, SelectStatement};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Select, Value};
use serde::Serialize;

use crate::error::ClosureTreeError;
use crate::lock::ensure_supported;
use crate::order::OrderAllocator;
use crate::repository::ClosureTreeRepository;
use crate::traits::ClosureTreeModel;

/// A node with its nested children, as produced by
/// [`ClosureTreeRepository::hash_tree`].
#[derive(Clone, Debug, Serialize)]
pub struct Subtree<M> {
    pub node: M,
    pub children: Vec<Subtree<M>>,
}

impl<M> Subtree<M> {
    /// Number of nodes in this subtree, including the root.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Subtree::size).sum::<usize>()
    }
}

#[derive(Copy, Clone)]
enum Siblings {
    All,
    Before,
    After,
}

/// Which nodes a preordered projection covers.
enum Members<'a, Id> {
    All,
    Subtree(&'a Id),
    Generation(Option<&'a Id>, i32),
}

/// Configured identifiers of both tables.
struct Tables {
    nodes: Alias,
    id: Alias,
    parent: Alias,
    order: Alias,
    type_tag: Alias,
    hierarchy: Alias,
    ancestor: Alias,
    descendant: Alias,
    generations: Alias,
}

impl Tables {
    /// Hierarchy rows below `ancestor`, optionally at one exact distance.
    fn descendants_below(&self, ancestor: Value, generation: Option<i32>) -> SelectStatement {
        let s = Alias::new("s");
        let mut query = Query::select();
        query
            .column((s.clone(), self.descendant.clone()))
            .from_as(self.hierarchy.clone(), s.clone())
            .and_where(Expr::col((s.clone(), self.ancestor.clone())).eq(ancestor));
        if let Some(generation) = generation {
            query.and_where(Expr::col((s, self.generations.clone())).eq(generation));
        }
        query
    }

    /// Hierarchy rows exactly `generation` below any root.
    fn below_roots(&self, generation: i32) -> SelectStatement {
        let (s, r) = (Alias::new("s"), Alias::new("r"));
        Query::select()
            .column((s.clone(), self.descendant.clone()))
            .from_as(self.hierarchy.clone(), s.clone())
            .join_as(
                JoinType::InnerJoin,
                self.nodes.clone(),
                r.clone(),
                Expr::col((r.clone(), self.id.clone())).equals((s.clone(), self.ancestor.clone())),
            )
            .and_where(Expr::col((r, self.parent.clone())).is_null())
            .and_where(Expr::col((s, self.generations.clone())).eq(generation))
            .to_owned()
    }

    /// Rows of `n` that have at least one child.
    fn has_children(&self, n: &Alias) -> SelectStatement {
        let c = Alias::new("c");
        Query::select()
            .expr(Expr::val(1))
            .from_as(self.nodes.clone(), c.clone())
            .and_where(Expr::col((c, self.parent.clone())).equals((n.clone(), self.id.clone())))
            .to_owned()
    }
}

impl<M> ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        let model = M::Entity::find()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .one(conn)
            .await?;
        Ok(model)
    }

    pub(crate) async fn find_required<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<M, ClosureTreeError> {
        self.find(conn, id)
            .await?
            .ok_or_else(|| ClosureTreeError::not_found(id))
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Option<M>, ClosureTreeError> {
        let current = self.find_required(conn, &model.id()).await?;
        match current.parent_id() {
            Some(parent_id) => self.find(conn, &parent_id).await,
            None => Ok(None),
        }
    }

    /// Direct children ordered by sibling position.
    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        let id = model.id();
        let query = M::Entity::find().filter(OrderAllocator::<M>::group(Some(&id)));
        let rows = Self::scoped(query, scope)
            .order_by_asc(M::order_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    pub(crate) async fn children_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M>, ClosureTreeError> {
        let rows = M::Entity::find()
            .filter(OrderAllocator::<M>::group(Some(id)))
            .order_by_asc(M::order_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Parentless nodes ordered by sibling position.
    pub async fn roots<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        let query = M::Entity::find().filter(M::parent_column().is_null());
        let rows = Self::scoped(query, scope)
            .order_by_asc(M::order_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// The node itself first, then each ancestor up to the root.
    pub async fn self_and_ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.linked(conn, &model.id(), true, 0, scope).await
    }

    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.linked(conn, &model.id(), true, 1, scope).await
    }

    /// The node itself first, then every descendant by generation and
    /// sibling position.
    pub async fn self_and_descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.linked(conn, &model.id(), false, 0, scope).await
    }

    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.linked(conn, &model.id(), false, 1, scope).await
    }

    pub async fn root_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<M, ClosureTreeError> {
        self.self_and_ancestors(conn, model, None)
            .await?
            .pop()
            .ok_or_else(|| ClosureTreeError::not_found(&model.id()))
    }

    /// Number of ancestors above the node; roots have depth 0.
    pub async fn depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<usize, ClosureTreeError> {
        ensure_supported(conn)?;
        let chain = self.hierarchy.ancestors_of(conn, &model.id()).await?;
        chain
            .len()
            .checked_sub(1)
            .ok_or_else(|| ClosureTreeError::not_found(&model.id()))
    }

    /// Names from the root down to the node.
    pub async fn ancestry_path<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<String>, ClosureTreeError> {
        let chain = self.self_and_ancestors(conn, model, None).await?;
        Ok(chain
            .iter()
            .rev()
            .map(|node| node.name().to_owned())
            .collect())
    }

    pub async fn is_ancestor_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &M,
        descendant: &M,
    ) -> Result<bool, ClosureTreeError> {
        ensure_supported(conn)?;
        self.hierarchy
            .is_related(conn, &ancestor.id(), &descendant.id(), 1)
            .await
    }

    pub async fn is_descendant_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        descendant: &M,
        ancestor: &M,
    ) -> Result<bool, ClosureTreeError> {
        self.is_ancestor_of(conn, ancestor, descendant).await
    }

    pub async fn self_and_siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.siblings(conn, model, Siblings::All, scope).await
    }

    pub async fn siblings_before<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.siblings(conn, model, Siblings::Before, scope).await
    }

    pub async fn siblings_after<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.siblings(conn, model, Siblings::After, scope).await
    }

    /// Nodes exactly `generation` levels below `from`, or below the roots
    /// when `from` is `None`, in preorder.
    pub async fn find_all_by_generation<C: ConnectionTrait>(
        &self,
        conn: &C,
        from: Option<&M>,
        generation: i32,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        if generation < 0 {
            return Ok(Vec::new());
        }
        let from_id = from.map(|model| model.id());
        self.preordered(
            conn,
            Members::Generation(from_id.as_ref(), generation),
            false,
            scope,
        )
        .await
    }

    /// Depth-first walk of the node's subtree, children in sibling order.
    pub async fn self_and_descendants_preordered<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        let id = model.id();
        self.preordered(conn, Members::Subtree(&id), false, scope)
            .await
    }

    /// Depth-first walk of the whole forest, roots in sibling order.
    pub async fn roots_and_descendants_preordered<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        self.preordered(conn, Members::All, false, scope).await
    }

    /// Childless nodes of the subtree under `from` (or of the whole forest),
    /// in preorder.
    pub async fn leaves<C: ConnectionTrait>(
        &self,
        conn: &C,
        from: Option<&M>,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        let from_id = from.map(|model| model.id());
        let members = match from_id.as_ref() {
            Some(id) => Members::Subtree(id),
            None => Members::All,
        };
        self.preordered(conn, members, true, scope).await
    }

    /// Nested view of the subtree under `from` (or of the whole forest).
    ///
    /// `limit_depth` counts levels, so `Some(1)` returns the top nodes
    /// without children.
    pub async fn hash_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        from: Option<&M>,
        limit_depth: Option<usize>,
    ) -> Result<Vec<Subtree<M>>, ClosureTreeError> {
        if limit_depth == Some(0) {
            return Ok(Vec::new());
        }

        let (nodes, top) = match from {
            Some(model) => {
                let nodes = self.self_and_descendants_preordered(conn, model, None).await?;
                (nodes, Some(model.id()))
            }
            None => (self.roots_and_descendants_preordered(conn, None).await?, None),
        };

        let mut by_parent: HashMap<Option<M::Id>, Vec<M>> = HashMap::new();
        let mut heads = Vec::new();
        for node in nodes {
            let is_head = match &top {
                Some(top) => node.id() == *top,
                None => node.parent_id().is_none(),
            };
            if is_head {
                heads.push(node);
            } else {
                by_parent.entry(node.parent_id()).or_default().push(node);
            }
        }

        Ok(heads
            .into_iter()
            .map(|head| assemble(head, &mut by_parent, limit_depth))
            .collect())
    }

    fn scoped(query: Select<M::Entity>, scope: Option<&M::TypeTag>) -> Select<M::Entity> {
        match scope {
            Some(tag) => query.filter(M::type_tag_column().eq(M::type_tag_to_value(tag))),
            None => query,
        }
    }

    async fn siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        which: Siblings,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        let current = self.find_required(conn, &model.id()).await?;
        let parent_id = current.parent_id();
        let mut query = M::Entity::find().filter(OrderAllocator::<M>::group(parent_id.as_ref()));
        query = match which {
            Siblings::All => query,
            Siblings::Before => query.filter(M::order_column().lt(current.order_value())),
            Siblings::After => query.filter(M::order_column().gt(current.order_value())),
        };
        let rows = Self::scoped(query, scope)
            .order_by_asc(M::order_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    fn tables(&self) -> Tables {
        let config = self.config();
        Tables {
            nodes: Alias::new(config.table_name()),
            id: Alias::new(config.id_column()),
            parent: Alias::new(config.parent_column()),
            order: Alias::new(config.order_column()),
            type_tag: Alias::new(config.type_tag_column()),
            hierarchy: Alias::new(config.hierarchy_table()),
            ancestor: Alias::new(config.ancestor_column()),
            descendant: Alias::new(config.descendant_column()),
            generations: Alias::new(config.generations_column()),
        }
    }

    /// Restricts the `n` projection to one type tag.
    fn scope_projection(
        query: &mut SelectStatement,
        n: &Alias,
        tables: &Tables,
        scope: Option<&M::TypeTag>,
    ) {
        if let Some(tag) = scope {
            query.and_where(
                Expr::col((n.clone(), tables.type_tag.clone())).eq(M::type_tag_to_value(tag)),
            );
        }
    }

    /// Ancestors (`upward`) or descendants of `id` at least `min_generations`
    /// away, nearest first.
    async fn linked<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        upward: bool,
        min_generations: i32,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        let t = self.tables();
        let (n, h) = (Alias::new("n"), Alias::new("h"));
        let (joined, anchored) = if upward {
            (&t.ancestor, &t.descendant)
        } else {
            (&t.descendant, &t.ancestor)
        };

        let mut query = Query::select();
        query
            .column((n.clone(), Asterisk))
            .from_as(t.nodes.clone(), n.clone())
            .join_as(
                JoinType::InnerJoin,
                t.hierarchy.clone(),
                h.clone(),
                Expr::col((h.clone(), joined.clone())).equals((n.clone(), t.id.clone())),
            )
            .and_where(Expr::col((h.clone(), anchored.clone())).eq(M::hierarchy_id_to_value(id)))
            .and_where(Expr::col((h.clone(), t.generations.clone())).gte(min_generations))
            .order_by((h, t.generations.clone()), Order::Asc)
            .order_by((n.clone(), t.order.clone()), Order::Asc)
            .order_by((n.clone(), t.id.clone()), Order::Asc);
        Self::scope_projection(&mut query, &n, &t, scope);

        let rows = M::Entity::find()
            .from_raw_sql(conn.get_database_backend().build(&query))
            .all(conn)
            .await?;
        Ok(rows)
    }

    async fn preordered<C: ConnectionTrait>(
        &self,
        conn: &C,
        members: Members<'_, M::Id>,
        leaves_only: bool,
        scope: Option<&M::TypeTag>,
    ) -> Result<Vec<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        let t = self.tables();
        let (n, h, a) = (Alias::new("n"), Alias::new("h"), Alias::new("a"));

        // One row per (member, ancestor) pair, carrying the ancestor's position.
        let mut query = Query::select();
        query
            .column((n.clone(), Asterisk))
            .expr_as(
                Expr::col((h.clone(), t.generations.clone())),
                Alias::new("ct_generations"),
            )
            .expr_as(
                Expr::col((a.clone(), t.order.clone())),
                Alias::new("ct_ancestor_order"),
            )
            .from_as(t.nodes.clone(), n.clone())
            .join_as(
                JoinType::InnerJoin,
                t.hierarchy.clone(),
                h.clone(),
                Expr::col((h.clone(), t.descendant.clone())).equals((n.clone(), t.id.clone())),
            )
            .join_as(
                JoinType::InnerJoin,
                t.nodes.clone(),
                a.clone(),
                Expr::col((a, t.id.clone())).equals((h, t.ancestor.clone())),
            );

        let member_ids = match members {
            Members::All => None,
            Members::Subtree(root) => Some(t.descendants_below(M::hierarchy_id_to_value(root), None)),
            Members::Generation(Some(from), generation) => {
                Some(t.descendants_below(M::hierarchy_id_to_value(from), Some(generation)))
            }
            Members::Generation(None, generation) => Some(t.below_roots(generation)),
        };
        if let Some(member_ids) = member_ids {
            query.and_where(Expr::col((n.clone(), t.id.clone())).in_subquery(member_ids));
        }
        if leaves_only {
            query.and_where(Expr::exists(t.has_children(&n)).not());
        }
        Self::scope_projection(&mut query, &n, &t, scope);

        let rows = conn
            .query_all(conn.get_database_backend().build(&query))
            .await?;
        let mut keyed = Vec::with_capacity(rows.len());
        for row in &rows {
            let model = M::from_query_result(row, "")?;
            let generations: i32 = row.try_get("", "ct_generations")?;
            let ancestor_order: i32 = row.try_get("", "ct_ancestor_order")?;
            keyed.push((model.id(), model, generations, ancestor_order));
        }

        Ok(sort_by_path(keyed))
    }
}

/// Orders items by their root-to-node path of sibling positions.
///
/// Each input row carries one `(generations, ancestor order)` pair for an
/// item; an item's path lists its ancestors' order values from the most
/// distant one down to its own (generation 0). Comparing paths
/// lexicographically yields preorder, since a prefix sorts before its
/// extensions.
fn sort_by_path<K, T>(rows: impl IntoIterator<Item = (K, T, i32, i32)>) -> Vec<T>
where
    K: Eq + Hash,
{
    let mut items: HashMap<K, (T, Vec<(i32, i32)>)> = HashMap::new();
    for (key, item, generations, order) in rows {
        items
            .entry(key)
            .or_insert_with(|| (item, Vec::new()))
            .1
            .push((generations, order));
    }

    let mut keyed = items
        .into_values()
        .map(|(item, mut steps)| {
            steps.sort_by(|a, b| b.0.cmp(&a.0));
            let path = steps.into_iter().map(|(_, order)| order).collect::<Vec<_>>();
            (path, item)
        })
        .collect::<Vec<_>>();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, item)| item).collect()
}

fn assemble<M: ClosureTreeModel>(
    node: M,
    by_parent: &mut HashMap<Option<M::Id>, Vec<M>>,
    remaining: Option<usize>,
) -> Subtree<M> {
    let children = if remaining == Some(1) {
        Vec::new()
    } else {
        by_parent.remove(&Some(node.id())).unwrap_or_default()
    };
    let children = children
        .into_iter()
        .map(|child| assemble(child, by_parent, remaining.map(|left| left - 1)))
        .collect();
    Subtree { node, children }
}
