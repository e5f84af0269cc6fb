#![allow(dead_code)]

use ordered_closure_tree::{ClosureTreeModel, ClosureTreeRepository};
use sea_orm::entity::prelude::*;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbBackend, QueryOrder, Set, Statement};

pub mod entity {
    pub mod node {
        use ordered_closure_tree::ClosureTreeModelDerive as ClosureTreeModel;
        use sea_orm::entity::prelude::*;
        use serde::Serialize;

        #[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
        #[sea_orm(rs_type = "String", db_type = "Text")]
        pub enum NodeKind {
            #[sea_orm(string_value = "directory")]
            Directory,
            #[sea_orm(string_value = "file")]
            File,
        }

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel, Serialize)]
        #[sea_orm(table_name = "nodes")]
        #[closure_tree(
            hierarchy_module = "crate::common::entity::node_hierarchy",
            hierarchy_table = "node_hierarchies"
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub name: String,
            pub order_value: i32,
            pub type_tag: NodeKind,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod node_hierarchy {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "node_hierarchies")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub ancestor_id: i32,
            #[sea_orm(primary_key, auto_increment = false)]
            pub descendant_id: i32,
            pub generations: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    /// Children of a destroyed category are handed to its parent.
    pub mod category {
        use ordered_closure_tree::ClosureTreeModelDerive as ClosureTreeModel;
        use sea_orm::entity::prelude::*;

        use super::node::NodeKind;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel)]
        #[sea_orm(table_name = "categories")]
        #[closure_tree(
            hierarchy_module = "crate::common::entity::category_hierarchy",
            dependent = "adopt"
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub name: String,
            pub order_value: i32,
            pub type_tag: NodeKind,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod category_hierarchy {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "categories_hierarchies")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub ancestor_id: i32,
            #[sea_orm(primary_key, auto_increment = false)]
            pub descendant_id: i32,
            pub generations: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    /// Children of a destroyed label become roots. Uses custom column names.
    pub mod label {
        use ordered_closure_tree::ClosureTreeModelDerive as ClosureTreeModel;
        use sea_orm::entity::prelude::*;

        use super::node::NodeKind;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel)]
        #[sea_orm(table_name = "labels")]
        #[closure_tree(
            hierarchy_module = "crate::common::entity::label_hierarchy",
            hierarchy_table = "label_paths",
            order_field = "position",
            type_tag_field = "kind",
            generations_field = "depth",
            dependent = "nullify"
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub name: String,
            pub position: i32,
            pub kind: NodeKind,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod label_hierarchy {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "label_paths")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub ancestor_id: i32,
            #[sea_orm(primary_key, auto_increment = false)]
            pub descendant_id: i32,
            pub depth: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

pub use entity::node::NodeKind;

pub type Node = entity::node::Model;
pub type NodeRepository = ClosureTreeRepository<Node>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        order_value INTEGER NOT NULL,
        type_tag TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX nodes_sibling_order ON nodes (parent_id, order_value)",
    r#"
    CREATE TABLE node_hierarchies (
        ancestor_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        descendant_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )
    "#,
    r#"
    CREATE TABLE categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES categories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        order_value INTEGER NOT NULL,
        type_tag TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX categories_sibling_order ON categories (parent_id, order_value)",
    r#"
    CREATE TABLE categories_hierarchies (
        ancestor_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        descendant_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )
    "#,
    r#"
    CREATE TABLE labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES labels(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        position INTEGER NOT NULL,
        kind TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX labels_sibling_order ON labels (parent_id, position)",
    r#"
    CREATE TABLE label_paths (
        ancestor_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
        descendant_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
        depth INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )
    "#,
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh in-memory SQLite database with every test table created.
pub async fn setup_database() -> Result<DatabaseConnection, DbErr> {
    init_tracing();

    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    for statement in SCHEMA {
        db.execute(Statement::from_string(DbBackend::Sqlite, *statement))
            .await?;
    }
    Ok(db)
}

pub fn new_node(name: &str, kind: NodeKind) -> entity::node::ActiveModel {
    entity::node::ActiveModel {
        name: Set(name.to_owned()),
        type_tag: Set(kind),
        ..Default::default()
    }
}

pub fn dir(name: &str) -> entity::node::ActiveModel {
    new_node(name, NodeKind::Directory)
}

pub fn file(name: &str) -> entity::node::ActiveModel {
    new_node(name, NodeKind::File)
}

pub fn names<M: ClosureTreeModel>(models: &[M]) -> Vec<String> {
    models.iter().map(|model| model.name().to_owned()).collect()
}

/// Children of `parent` (or the roots) as `(name, order_value)`, by position.
pub async fn group(db: &DatabaseConnection, parent: Option<i32>) -> Result<Vec<(String, i32)>, DbErr> {
    let query = entity::node::Entity::find();
    let query = match parent {
        Some(parent) => query.filter(entity::node::Column::ParentId.eq(parent)),
        None => query.filter(entity::node::Column::ParentId.is_null()),
    };
    let rows = query
        .order_by_asc(entity::node::Column::OrderValue)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.name, row.order_value))
        .collect())
}

/// Every sibling group in the `nodes` table is exactly `0..count`.
pub async fn assert_all_groups_dense(db: &DatabaseConnection) -> Result<(), DbErr> {
    let all = entity::node::Entity::find().all(db).await?;
    let mut parents = all.iter().map(|node| node.parent_id).collect::<Vec<_>>();
    parents.sort();
    parents.dedup();
    for parent in parents {
        let orders = group(db, parent)
            .await?
            .into_iter()
            .map(|(_, order)| order)
            .collect::<Vec<_>>();
        let expected = (0..orders.len() as i32).collect::<Vec<_>>();
        assert_eq!(orders, expected, "sibling group under {parent:?} is not dense");
    }
    Ok(())
}

/// All closure rows as sorted `(ancestor, descendant, generations)` triples.
pub async fn edges(db: &DatabaseConnection) -> Result<Vec<(i32, i32, i32)>, DbErr> {
    let mut rows = entity::node_hierarchy::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|row| (row.ancestor_id, row.descendant_id, row.generations))
        .collect::<Vec<_>>();
    rows.sort();
    Ok(rows)
}

/// All node rows as sorted `(id, parent, order)` triples.
pub async fn layout(db: &DatabaseConnection) -> Result<Vec<(i32, Option<i32>, i32)>, DbErr> {
    let mut rows = entity::node::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|row| (row.id, row.parent_id, row.order_value))
        .collect::<Vec<_>>();
    rows.sort();
    Ok(rows)
}
