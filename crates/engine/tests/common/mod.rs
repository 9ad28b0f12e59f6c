#![allow(dead_code)]

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

use engine::{Engine, Money};
use migration::MigratorTrait;
use uuid::Uuid;

pub const OWNER: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;
pub const MALLORY: i64 = 99;

pub async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

pub async fn engine_with_file_db() -> (Engine, DatabaseConnection, std::path::PathBuf) {
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("engine_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let db = Database::connect(&url).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db, path)
}

pub fn money(s: &str) -> Money {
    s.parse().unwrap()
}

/// A group owned by `OWNER` with `BOB` and `CAROL` assigned (view only).
pub async fn group_of_three(engine: &Engine) -> i64 {
    let group = engine.create_group(OWNER, "Trip", None).await.unwrap();
    engine
        .assign_user_to_group(OWNER, BOB, group.id)
        .await
        .unwrap();
    engine
        .assign_user_to_group(OWNER, CAROL, group.id)
        .await
        .unwrap();
    group.id
}

pub async fn drop_table(db: &DatabaseConnection, table: &str) {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        format!("DROP TABLE {table}"),
    ))
    .await
    .unwrap();
}

pub async fn count_rows(db: &DatabaseConnection, sql: &str) -> i64 {
    let row = db
        .query_one(Statement::from_string(db.get_database_backend(), sql))
        .await
        .unwrap()
        .unwrap();
    row.try_get_by_index::<i64>(0).unwrap()
}
