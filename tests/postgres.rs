//! Runs against a live PostgreSQL server when `CLOSURE_TREE_TEST_DATABASE_URL`
//! is set; otherwise every test returns early.

use ordered_closure_tree::{Attachable, ChildPosition, ClosureTreeRepository};
use sea_orm::entity::prelude::*;
use sea_orm::{Database, DatabaseConnection, DbBackend, Set, Statement};

mod entity {
    pub mod pg_node {
        use ordered_closure_tree::ClosureTreeModelDerive as ClosureTreeModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosureTreeModel)]
        #[sea_orm(table_name = "pg_nodes")]
        #[closure_tree(
            hierarchy_module = "crate::entity::pg_node_hierarchy",
            hierarchy_table = "pg_node_hierarchies"
        )]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub name: String,
            pub order_value: i32,
            pub type_tag: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod pg_node_hierarchy {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "pg_node_hierarchies")]
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
}

use entity::pg_node;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn named(name: &str) -> pg_node::ActiveModel {
    pg_node::ActiveModel {
        name: Set(name.to_owned()),
        type_tag: Set("folder".to_owned()),
        ..Default::default()
    }
}

fn names(nodes: &[pg_node::Model]) -> Vec<&str> {
    nodes.iter().map(|node| node.name.as_str()).collect()
}

// Both scenarios share the tables, so they run in sequence in one test.
#[tokio::test]
async fn postgres_scenarios() -> TestResult {
    let Some(db) = setup_database().await? else {
        return Ok(());
    };
    let repo = ClosureTreeRepository::<pg_node::Model>::new();

    reset_tables(&db).await?;
    paths_and_sibling_order(&db, &repo).await?;

    reset_tables(&db).await?;
    moves_and_destroys(&db, &repo).await?;
    Ok(())
}

async fn paths_and_sibling_order(
    db: &DatabaseConnection,
    repo: &ClosureTreeRepository<pg_node::Model>,
) -> TestResult {
    let leaf = repo
        .find_or_create_by_path(db, &["root", "child", "leaf"], "folder".to_owned())
        .await?;
    assert_eq!(leaf.name, "leaf");

    let child = repo
        .find_by_path(db, &["root", "child"])
        .await?
        .expect("child node exists");
    let root = repo.parent(db, &child).await?.expect("root exists");

    repo.add_child(db, &root, Attachable::new(named("first")), ChildPosition::Start)
        .await?;
    repo.append_sibling(db, &child, Attachable::new(named("after-child")))
        .await?;

    assert_eq!(
        names(&repo.children(db, &root, None).await?),
        vec!["first", "child", "after-child"]
    );
    assert_eq!(
        names(&repo.self_and_descendants_preordered(db, &root, None).await?),
        vec!["root", "first", "child", "leaf", "after-child"]
    );
    Ok(())
}

async fn moves_and_destroys(
    db: &DatabaseConnection,
    repo: &ClosureTreeRepository<pg_node::Model>,
) -> TestResult {
    let a = repo.create(db, named("a"), None).await?;
    let b = repo.create(db, named("b"), None).await?;
    let a1 = repo.create(db, named("a1"), Some(&a.id)).await?;
    repo.create(db, named("a1x"), Some(&a1.id)).await?;

    repo.add_child(db, &b, Attachable::existing(&a1), ChildPosition::End)
        .await?;
    assert_eq!(
        repo.ancestry_path(db, &a1).await?,
        vec!["b".to_owned(), "a1".to_owned()]
    );

    assert_eq!(repo.destroy(db, &b).await?, 3);
    assert_eq!(names(&repo.roots(db, None).await?), vec!["a"]);
    assert_eq!(repo.rebuild(db).await?, 1);
    Ok(())
}

async fn setup_database() -> Result<Option<DatabaseConnection>, sea_orm::DbErr> {
    let Ok(url) = std::env::var("CLOSURE_TREE_TEST_DATABASE_URL") else {
        return Ok(None);
    };
    Database::connect(url).await.map(Some)
}

async fn reset_tables(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    db.execute(Statement::from_string(
        DbBackend::Postgres,
        r#"
        CREATE TABLE IF NOT EXISTS pg_nodes (
            id SERIAL PRIMARY KEY,
            parent_id INTEGER REFERENCES pg_nodes(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            order_value INTEGER NOT NULL,
            type_tag TEXT NOT NULL,
            UNIQUE (parent_id, order_value)
        );
        "#,
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        r#"
        CREATE TABLE IF NOT EXISTS pg_node_hierarchies (
            ancestor_id INTEGER NOT NULL REFERENCES pg_nodes(id) ON DELETE CASCADE,
            descendant_id INTEGER NOT NULL REFERENCES pg_nodes(id) ON DELETE CASCADE,
            generations INTEGER NOT NULL,
            PRIMARY KEY (ancestor_id, descendant_id)
        );
        "#,
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        "TRUNCATE TABLE pg_node_hierarchies, pg_nodes RESTART IDENTITY CASCADE;",
    ))
    .await?;

    Ok(())
}
