//! Dense, zero-based sibling ordering.
//!
//! Every sibling group (the children of one parent, or all roots) holds the
//! order values `0..count` exactly once. Bulk shifts run in two phases
//! through negative scratch values so that a unique index on
//! `(parent, order)` is never violated mid-statement.

use std::marker::PhantomData;

use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Value,
};

use crate::error::ClosureTreeError;
use crate::traits::ClosureTreeModel;

/// Order value held by a node while it is between two sibling groups.
pub(crate) const PARKED: i32 = i32::MIN;

type ColumnOf<M> = <<M as ClosureTreeModel>::Entity as EntityTrait>::Column;

pub struct OrderAllocator<M>
where
    M: ClosureTreeModel,
{
    column: ColumnOf<M>,
    _marker: PhantomData<M>,
}

impl<M> OrderAllocator<M>
where
    M: ClosureTreeModel,
{
    pub fn new(column: ColumnOf<M>) -> Self {
        Self {
            column,
            _marker: PhantomData,
        }
    }

    /// Condition selecting one sibling group.
    pub fn group(parent_id: Option<&M::Id>) -> Condition {
        Self::group_of(parent_id.map(M::id_to_value))
    }

    fn group_of(parent: Option<Value>) -> Condition {
        match parent {
            Some(parent) => Condition::all().add(M::parent_column().eq(parent)),
            None => Condition::all().add(M::parent_column().is_null()),
        }
    }

    /// Position an appended sibling receives: one past the current maximum.
    pub async fn next_order_value<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
    ) -> Result<i32, ClosureTreeError> {
        let max = M::Entity::find()
            .select_only()
            .column_as(Expr::col(self.column).max(), "max_order")
            .filter(Self::group(parent_id))
            .filter(self.column.gte(0))
            .into_tuple::<Option<i32>>()
            .one(conn)
            .await?
            .flatten();
        Ok(max.map_or(0, |max| max + 1))
    }

    /// Current order values of a group, ascending.
    pub async fn sibling_orders<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
    ) -> Result<Vec<i32>, ClosureTreeError> {
        let orders = M::Entity::find()
            .select_only()
            .column(self.column)
            .filter(Self::group(parent_id))
            .order_by_asc(self.column)
            .into_tuple::<i32>()
            .all(conn)
            .await?;
        Ok(orders)
    }

    /// Checks that a group is dense before it gets mutated and returns its size.
    pub async fn verify<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
    ) -> Result<i32, ClosureTreeError> {
        let orders = self.sibling_orders(conn, parent_id).await?;
        if !is_dense(&orders) {
            tracing::error!(
                parent = ?parent_id,
                found = ?orders,
                "sibling order is not dense"
            );
            return Err(ClosureTreeError::order_conflict(
                parent_id,
                parent_id.map(M::id_to_value),
                orders,
            ));
        }
        Ok(orders.len() as i32)
    }

    /// Opens a slot at `index` (clamped to `0..=count`) and returns it.
    pub async fn insert_at<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        index: i32,
    ) -> Result<i32, ClosureTreeError> {
        let count = M::Entity::find()
            .filter(Self::group(parent_id))
            .filter(self.column.gte(0))
            .count(conn)
            .await? as i32;
        let index = index.clamp(0, count);
        if index < count {
            self.shift(conn, parent_id, self.column.gte(index), 1)
                .await?;
        }
        Ok(index)
    }

    /// Closes the gap left by a node removed from position `removed`.
    pub async fn remove_and_compact<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        removed: i32,
    ) -> Result<(), ClosureTreeError> {
        self.shift(conn, parent_id, self.column.gt(removed), -1)
            .await
    }

    /// Takes a node out of its group's numbering while it is being moved.
    pub async fn park<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<(), ClosureTreeError> {
        self.assign(conn, id, PARKED).await
    }

    /// Renumbers a group densely by current order, ties broken by id.
    /// Returns the group size.
    pub async fn renumber<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
    ) -> Result<usize, ClosureTreeError> {
        self.renumber_group(conn, parent_id.map(M::id_to_value))
            .await
    }

    /// [`renumber`](Self::renumber) for a group named by its parent's
    /// database value, as carried by [`ClosureTreeError::OrderConflict`].
    pub async fn renumber_group<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent: Option<Value>,
    ) -> Result<usize, ClosureTreeError> {
        let siblings = M::Entity::find()
            .filter(Self::group_of(parent))
            .order_by_asc(self.column)
            .order_by_asc(M::id_column())
            .all(conn)
            .await?;

        // Misplaced rows first drop below the group's lowest value, then take
        // their final position.
        let floor = siblings
            .iter()
            .map(|sibling| sibling.order_value())
            .min()
            .unwrap_or(0)
            .min(0);
        let mut misplaced = Vec::new();
        for (index, sibling) in siblings.iter().enumerate() {
            let index = index as i32;
            if sibling.order_value() == index {
                continue;
            }
            let scratch = i32::try_from(i64::from(floor) - 1 - i64::from(index)).map_err(|_| {
                ClosureTreeError::invariant("sibling group has no room below its lowest order value")
            })?;
            self.assign(conn, &sibling.id(), scratch).await?;
            misplaced.push((sibling.id(), index));
        }
        for (id, index) in &misplaced {
            self.assign(conn, id, *index).await?;
        }
        Ok(siblings.len())
    }

    async fn assign<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        order: i32,
    ) -> Result<(), ClosureTreeError> {
        M::Entity::update_many()
            .col_expr(self.column, Expr::value(order))
            .filter(M::id_column().eq(M::id_to_value(id)))
            .exec(conn)
            .await?;
        Ok(())
    }

    async fn shift<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        range: SimpleExpr,
        delta: i32,
    ) -> Result<(), ClosureTreeError> {
        // v -> -(v + delta) - 1, strictly negative for every target v + delta >= 0
        M::Entity::update_many()
            .col_expr(self.column, Expr::val(-1 - delta).sub(Expr::col(self.column)))
            .filter(Self::group(parent_id))
            .filter(range)
            .exec(conn)
            .await?;
        self.restore_scratch(conn, parent_id).await
    }

    async fn restore_scratch<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
    ) -> Result<(), ClosureTreeError> {
        M::Entity::update_many()
            .col_expr(self.column, Expr::val(-1).sub(Expr::col(self.column)))
            .filter(Self::group(parent_id))
            .filter(self.column.lt(0))
            .filter(self.column.gt(PARKED))
            .exec(conn)
            .await?;
        Ok(())
    }
}

/// Whether `sorted` is exactly `0..len`.
pub(crate) fn is_dense(sorted: &[i32]) -> bool {
    sorted
        .iter()
        .enumerate()
        .all(|(index, order)| *order == index as i32)
}
