use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Create runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_number INTEGER PRIMARY KEY,
            run_date INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reference data, latest snapshot wins
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            title TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS info_datasets (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            title TEXT NOT NULL,
            private INTEGER NOT NULL DEFAULT 0,
            organization_id TEXT NOT NULL,
            maintainer_id TEXT,
            maintainer_email TEXT,
            author TEXT,
            author_email TEXT,
            location TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create datasets table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            run_number INTEGER NOT NULL,
            id TEXT NOT NULL,
            dataset_date TEXT,
            update_frequency INTEGER,
            last_modified INTEGER NOT NULL,
            what_updated TEXT NOT NULL DEFAULT '',
            metadata_modified INTEGER NOT NULL,
            fresh INTEGER,
            error INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (run_number, id),
            FOREIGN KEY (run_number) REFERENCES runs(run_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            run_number INTEGER NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            dataset_id TEXT NOT NULL,
            url TEXT NOT NULL,
            format TEXT,
            error TEXT,
            last_modified INTEGER NOT NULL,
            what_updated TEXT NOT NULL DEFAULT '',
            revision_last_updated INTEGER,
            http_last_modified INTEGER,
            hash TEXT,
            when_hashed INTEGER,
            when_checked INTEGER NOT NULL,
            api INTEGER,
            PRIMARY KEY (run_number, id),
            FOREIGN KEY (run_number, dataset_id) REFERENCES datasets(run_number, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resources_dataset ON resources(run_number, dataset_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_datasets_fresh ON datasets(run_number, fresh)")
        .execute(pool)
        .await?;

    Ok(())
}
