use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};

use crate::error::ClosureTreeError;
use crate::lock::ensure_supported;
use crate::order::OrderAllocator;
use crate::repository::{ClosureTreeRepository, Slot};
use crate::traits::ClosureTreeModel;

impl<M> ClosureTreeRepository<M>
where
    M: ClosureTreeModel,
{
    /// Follows `segments` by name from the roots.
    pub async fn find_by_path<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        segments: &[S],
    ) -> Result<Option<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        self.find_by_path_on(conn, None, segments).await
    }

    /// Follows `segments` by name from the children of `node`.
    pub async fn find_by_path_from<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
        segments: &[S],
    ) -> Result<Option<M>, ClosureTreeError> {
        ensure_supported(conn)?;
        self.find_by_path_on(conn, Some(node.id()), segments).await
    }

    /// Resolves `segments` from the roots, appending any missing node with
    /// the given tag. Repeated calls return the same node.
    pub async fn find_or_create_by_path<S: AsRef<str>>(
        &self,
        conn: &DatabaseConnection,
        segments: &[S],
        type_tag: M::TypeTag,
    ) -> Result<M, ClosureTreeError> {
        if segments.is_empty() {
            return Err(ClosureTreeError::EmptyPath);
        }

        let guard = self.lock(conn).await?;
        let result = self
            .find_or_create_by_path_on(guard.connection(), None, segments, &type_tag)
            .await;
        self.conclude(conn, guard, result).await
    }

    /// Like [`find_or_create_by_path`](Self::find_or_create_by_path), starting
    /// beneath `node`.
    pub async fn find_or_create_by_path_from<S: AsRef<str>>(
        &self,
        conn: &DatabaseConnection,
        node: &M,
        segments: &[S],
        type_tag: M::TypeTag,
    ) -> Result<M, ClosureTreeError> {
        if segments.is_empty() {
            return Err(ClosureTreeError::EmptyPath);
        }

        let guard = self.lock(conn).await?;
        let result = async {
            let start = self.find_required(guard.connection(), &node.id()).await?;
            self.find_or_create_by_path_on(guard.connection(), Some(start.id()), segments, &type_tag)
                .await
        }
        .await;
        self.conclude(conn, guard, result).await
    }

    async fn find_by_path_on<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        start: Option<M::Id>,
        segments: &[S],
    ) -> Result<Option<M>, ClosureTreeError> {
        if segments.is_empty() {
            return Ok(None);
        }

        let mut current_parent = start;
        let mut current: Option<M> = None;

        for segment in segments {
            match self
                .find_child_by_name(conn, current_parent.as_ref(), segment.as_ref())
                .await?
            {
                Some(model) => {
                    current_parent = Some(model.id());
                    current = Some(model);
                }
                None => return Ok(None),
            }
        }

        Ok(current)
    }

    async fn find_or_create_by_path_on<S: AsRef<str>, C: ConnectionTrait>(
        &self,
        conn: &C,
        start: Option<M::Id>,
        segments: &[S],
        type_tag: &M::TypeTag,
    ) -> Result<M, ClosureTreeError> {
        let mut current_parent = start;
        let mut current: Option<M> = None;

        for segment in segments {
            let name = segment.as_ref();
            let model = match self
                .find_child_by_name(conn, current_parent.as_ref(), name)
                .await?
            {
                Some(model) => model,
                None => {
                    let mut active = M::ActiveModel::default();
                    M::set_name(&mut active, name);
                    M::set_type_tag(&mut active, type_tag.clone());
                    self.insert_node(conn, active, current_parent.clone(), Slot::End)
                        .await?
                }
            };
            current_parent = Some(model.id());
            current = Some(model);
        }

        current.ok_or_else(|| ClosureTreeError::invariant("path segments produced no model"))
    }

    async fn find_child_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        name: &str,
    ) -> Result<Option<M>, ClosureTreeError> {
        let model = M::Entity::find()
            .filter(OrderAllocator::<M>::group(parent_id))
            .filter(M::name_column().eq(name))
            .order_by_asc(M::order_column())
            .one(conn)
            .await?;
        Ok(model)
    }
}
