//! SQLite-backed [`RunStore`] implementation.
//!
//! Timestamps are stored as INTEGER microseconds since the Unix epoch;
//! `what_updated` as its comma-joined column form; `fresh` as its ordinal
//! (NULL when unavailable). See [`crate::migrate`] for the schema.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::FreshnessError;
use crate::migrate;
use crate::models::{
    DatasetRecord, Freshness, InfoDataset, Organization, ResourceRecord, Run, UpdateFrequency,
};
use crate::whatupdated::WhatUpdated;

use super::{check_membership, DatasetFilter, ResourceFilter, RunStore};

const DATASET_COLUMNS: &str = "run_number, id, dataset_date, update_frequency, last_modified, \
     what_updated, metadata_modified, fresh, error";

const RESOURCE_COLUMNS: &str = "run_number, id, name, dataset_id, url, format, error, \
     last_modified, what_updated, revision_last_updated, http_last_modified, hash, \
     when_hashed, when_checked, api";

const DATASET_WHERE: &str = "WHERE run_number = ? \
     AND (? = 0 OR fresh IS ?) \
     AND (? IS NULL OR what_updated = ?) \
     AND (? IS NULL OR error = ?)";

const RESOURCE_WHERE: &str = "WHERE run_number = ? \
     AND (? IS NULL OR dataset_id = ?) \
     AND (? IS NULL OR what_updated = ?) \
     AND (? IS NULL OR (error IS NOT NULL) = ?) \
     AND (? IS NULL OR api = ?)";

/// SQLite implementation of the [`RunStore`] trait.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| anyhow!("timestamp out of range: {}", micros))
}

fn opt_from_micros(micros: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    micros.map(from_micros).transpose()
}

fn bind_dataset_filter<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    run_number: i64,
    filter: &DatasetFilter,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let fresh = filter.fresh.and_then(|f| f.ordinal());
    let combo = filter.what_updated.as_ref().map(WhatUpdated::to_column);
    query
        .bind(run_number)
        .bind(filter.fresh.is_some())
        .bind(fresh)
        .bind(combo.clone())
        .bind(combo)
        .bind(filter.error)
        .bind(filter.error)
}

fn bind_resource_filter<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    run_number: i64,
    filter: &ResourceFilter,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let combo = filter.what_updated.as_ref().map(WhatUpdated::to_column);
    query
        .bind(run_number)
        .bind(filter.dataset_id.clone())
        .bind(filter.dataset_id.clone())
        .bind(combo.clone())
        .bind(combo)
        .bind(filter.has_error)
        .bind(filter.has_error)
        .bind(filter.api)
        .bind(filter.api)
}

fn row_to_run(row: &SqliteRow) -> Result<Run> {
    Ok(Run {
        number: row.try_get("run_number")?,
        date: from_micros(row.try_get("run_date")?)?,
    })
}

fn row_to_dataset(row: &SqliteRow) -> Result<DatasetRecord> {
    let what_updated: String = row.try_get("what_updated")?;
    let update_frequency: Option<i64> = row.try_get("update_frequency")?;
    Ok(DatasetRecord {
        run_number: row.try_get("run_number")?,
        id: row.try_get("id")?,
        dataset_date: row.try_get("dataset_date")?,
        update_frequency: update_frequency.and_then(UpdateFrequency::from_code),
        last_modified: from_micros(row.try_get("last_modified")?)?,
        what_updated: WhatUpdated::from_column(&what_updated)?,
        metadata_modified: from_micros(row.try_get("metadata_modified")?)?,
        fresh: Freshness::from_ordinal(row.try_get("fresh")?),
        error: row.try_get("error")?,
    })
}

fn row_to_resource(row: &SqliteRow) -> Result<ResourceRecord> {
    let what_updated: String = row.try_get("what_updated")?;
    Ok(ResourceRecord {
        run_number: row.try_get("run_number")?,
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        dataset_id: row.try_get("dataset_id")?,
        url: row.try_get("url")?,
        format: row.try_get("format")?,
        error: row.try_get("error")?,
        last_modified: from_micros(row.try_get("last_modified")?)?,
        what_updated: WhatUpdated::from_column(&what_updated)?,
        revision_last_updated: opt_from_micros(row.try_get("revision_last_updated")?)?,
        http_last_modified: opt_from_micros(row.try_get("http_last_modified")?)?,
        hash: row.try_get("hash")?,
        when_hashed: opt_from_micros(row.try_get("when_hashed")?)?,
        when_checked: from_micros(row.try_get("when_checked")?)?,
        api: row.try_get("api")?,
    })
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn latest_run(&self) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT run_number, run_date FROM runs ORDER BY run_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn begin_run(&self, date: DateTime<Utc>) -> Result<Run> {
        let mut tx = self.pool.begin().await.map_err(FreshnessError::from)?;

        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(run_number) FROM runs")
            .fetch_one(&mut *tx)
            .await
            .map_err(FreshnessError::from)?;
        let number = latest.map_or(0, |n| n + 1);

        sqlx::query("INSERT INTO runs (run_number, run_date) VALUES (?, ?)")
            .bind(number)
            .bind(to_micros(date))
            .execute(&mut *tx)
            .await
            .map_err(FreshnessError::from)?;

        tx.commit().await.map_err(FreshnessError::from)?;
        Ok(Run { number, date })
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query("SELECT run_number, run_date FROM runs ORDER BY run_number")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn upsert_organization(&self, org: &Organization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, title)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                title = excluded.title
            "#,
        )
        .bind(&org.id)
        .bind(&org.name)
        .bind(&org.title)
        .execute(&self.pool)
        .await
        .map_err(FreshnessError::from)?;
        Ok(())
    }

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT id, name, title FROM organizations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(Organization {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
                title: r.try_get("title")?,
            })),
            None => Ok(None),
        }
    }

    async fn count_organizations(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn upsert_info_dataset(&self, info: &InfoDataset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO info_datasets (id, name, title, private, organization_id,
                                       maintainer_id, maintainer_email, author,
                                       author_email, location)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                title = excluded.title,
                private = excluded.private,
                organization_id = excluded.organization_id,
                maintainer_id = excluded.maintainer_id,
                maintainer_email = excluded.maintainer_email,
                author = excluded.author,
                author_email = excluded.author_email,
                location = excluded.location
            "#,
        )
        .bind(&info.id)
        .bind(&info.name)
        .bind(&info.title)
        .bind(info.private)
        .bind(&info.organization_id)
        .bind(&info.maintainer_id)
        .bind(&info.maintainer_email)
        .bind(&info.author)
        .bind(&info.author_email)
        .bind(&info.location)
        .execute(&self.pool)
        .await
        .map_err(FreshnessError::from)?;
        Ok(())
    }

    async fn get_info_dataset(&self, id: &str) -> Result<Option<InfoDataset>> {
        let row = sqlx::query(
            "SELECT id, name, title, private, organization_id, maintainer_id, maintainer_email, \
             author, author_email, location FROM info_datasets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Some(InfoDataset {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
                title: r.try_get("title")?,
                private: r.try_get("private")?,
                organization_id: r.try_get("organization_id")?,
                maintainer_id: r.try_get("maintainer_id")?,
                maintainer_email: r.try_get("maintainer_email")?,
                author: r.try_get("author")?,
                author_email: r.try_get("author_email")?,
                location: r.try_get("location")?,
            })),
            None => Ok(None),
        }
    }

    async fn count_info_datasets(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM info_datasets")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn insert_dataset_with_resources(
        &self,
        dataset: &DatasetRecord,
        resources: &[ResourceRecord],
    ) -> Result<()> {
        check_membership(dataset, resources)?;

        let mut tx = self.pool.begin().await.map_err(FreshnessError::from)?;

        sqlx::query(&format!(
            "INSERT INTO datasets ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            DATASET_COLUMNS
        ))
        .bind(dataset.run_number)
        .bind(&dataset.id)
        .bind(&dataset.dataset_date)
        .bind(dataset.update_frequency.and_then(|f| f.code()))
        .bind(to_micros(dataset.last_modified))
        .bind(dataset.what_updated.to_column())
        .bind(to_micros(dataset.metadata_modified))
        .bind(dataset.fresh.ordinal())
        .bind(dataset.error)
        .execute(&mut *tx)
        .await
        .map_err(FreshnessError::from)?;

        for r in resources {
            sqlx::query(&format!(
                "INSERT INTO resources ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                RESOURCE_COLUMNS
            ))
            .bind(r.run_number)
            .bind(&r.id)
            .bind(&r.name)
            .bind(&r.dataset_id)
            .bind(&r.url)
            .bind(&r.format)
            .bind(&r.error)
            .bind(to_micros(r.last_modified))
            .bind(r.what_updated.to_column())
            .bind(r.revision_last_updated.map(to_micros))
            .bind(r.http_last_modified.map(to_micros))
            .bind(&r.hash)
            .bind(r.when_hashed.map(to_micros))
            .bind(to_micros(r.when_checked))
            .bind(r.api)
            .execute(&mut *tx)
            .await
            .map_err(FreshnessError::from)?;
        }

        tx.commit().await.map_err(FreshnessError::from)?;
        Ok(())
    }

    async fn datasets(
        &self,
        run_number: i64,
        filter: &DatasetFilter,
    ) -> Result<Vec<DatasetRecord>> {
        let sql = format!(
            "SELECT {} FROM datasets {} ORDER BY id",
            DATASET_COLUMNS, DATASET_WHERE
        );
        let rows = bind_dataset_filter(sqlx::query(&sql), run_number, filter)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_dataset).collect()
    }

    async fn count_datasets(&self, run_number: i64, filter: &DatasetFilter) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM datasets {}", DATASET_WHERE);
        let row = bind_dataset_filter(sqlx::query(&sql), run_number, filter)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn resources(
        &self,
        run_number: i64,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>> {
        let sql = format!(
            "SELECT {} FROM resources {} ORDER BY id",
            RESOURCE_COLUMNS, RESOURCE_WHERE
        );
        let rows = bind_resource_filter(sqlx::query(&sql), run_number, filter)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_resource).collect()
    }

    async fn count_resources(&self, run_number: i64, filter: &ResourceFilter) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM resources {}", RESOURCE_WHERE);
        let row = bind_resource_filter(sqlx::query(&sql), run_number, filter)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
