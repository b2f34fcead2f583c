//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Records are kept as
//! JSON documents next to the columns queries filter on.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;

use super::{Mutation, SchedulerRecord, Storage, StorageError, StoredTrigger, TriggerQuery, WriteBatch};
use crate::core::job::Job;
use crate::core::matcher::{GroupMatcher, StringOperator};
use crate::core::state::TriggerState;
use crate::core::trigger::Trigger;
use crate::core::types::{JobKey, TriggerKey};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration. Each
/// [`WriteBatch`] is committed in one transaction.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(db_err)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_triggers(&self, query: &TriggerQuery) -> Result<Vec<StoredTrigger>, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT state, document FROM triggers WHERE 1 = 1");

        if let Some(job_key) = &query.job_key {
            builder
                .push(" AND job_group = ")
                .push_bind(job_key.group().to_string())
                .push(" AND job_name = ")
                .push_bind(job_key.name().to_string());
        }
        if let Some(matcher) = &query.group {
            push_group_filter(&mut builder, "trigger_group", matcher);
        }
        if !query.states.is_empty() {
            builder.push(" AND state IN (");
            let mut states = builder.separated(", ");
            for state in &query.states {
                states.push_bind(state.as_str());
            }
            states.push_unseparated(")");
        }
        if let Some(calendar) = &query.calendar_name {
            builder
                .push(" AND calendar_name = ")
                .push_bind(calendar.clone());
        }
        if let Some(limit) = query.next_fire_not_after {
            builder
                .push(" AND next_fire_time IS NOT NULL AND next_fire_time <= ")
                .push_bind(limit.timestamp_millis());
        }
        builder.push(" ORDER BY trigger_name, trigger_group");

        let rows: Vec<(String, String)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut result = Vec::with_capacity(rows.len());
        for (state, document) in rows {
            let stored = decode_trigger(&state, &document)?;
            // SQL narrows the rows; the query predicate decides.
            if query.matches(&stored) {
                result.push(stored);
            }
        }
        Ok(result)
    }
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(document: &str) -> Result<T, StorageError> {
    serde_json::from_str(document).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode_trigger(state: &str, document: &str) -> Result<StoredTrigger, StorageError> {
    let state = TriggerState::from_str(state).map_err(StorageError::SerializationError)?;
    let trigger: Trigger = decode(document)?;
    Ok(StoredTrigger::new(trigger, state))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_group_filter(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, matcher: &GroupMatcher) {
    let value = escape_like(matcher.value());
    let pattern = match matcher.operator() {
        StringOperator::Equals => {
            builder
                .push(format!(" AND {} = ", column))
                .push_bind(matcher.value().to_string());
            return;
        }
        StringOperator::StartsWith => format!("{}%", value),
        StringOperator::EndsWith => format!("%{}", value),
        StringOperator::Contains => format!("%{}%", value),
        StringOperator::Anything => return,
    };
    builder
        .push(format!(" AND {} LIKE ", column))
        .push_bind(pattern)
        .push(" ESCAPE '\\'");
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn load_job(&self, key: &JobKey) -> Result<Option<Job>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document FROM jobs WHERE job_group = ? AND job_name = ?")
                .bind(key.group())
                .bind(key.name())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(|(document,)| decode(&document)).transpose()
    }

    async fn load_trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>, StorageError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT state, document FROM triggers WHERE trigger_group = ? AND trigger_name = ?",
        )
        .bind(key.group())
        .bind(key.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|(state, document)| decode_trigger(&state, &document))
            .transpose()
    }

    async fn load_scheduler(
        &self,
        instance_name: &str,
    ) -> Result<Option<SchedulerRecord>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document FROM schedulers WHERE instance_name = ?")
                .bind(instance_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(|(document,)| decode(&document)).transpose()
    }

    async fn query_triggers(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<StoredTrigger>, StorageError> {
        self.fetch_triggers(query).await
    }

    async fn query_trigger_keys(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<TriggerKey>, StorageError> {
        // Key-only queries skip the documents entirely.
        if query.calendar_name.is_none() && query.next_fire_not_after.is_none() {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT trigger_name, trigger_group FROM triggers WHERE 1 = 1",
            );
            if let Some(job_key) = &query.job_key {
                builder
                    .push(" AND job_group = ")
                    .push_bind(job_key.group().to_string())
                    .push(" AND job_name = ")
                    .push_bind(job_key.name().to_string());
            }
            if let Some(matcher) = &query.group {
                push_group_filter(&mut builder, "trigger_group", matcher);
            }
            if !query.states.is_empty() {
                builder.push(" AND state IN (");
                let mut states = builder.separated(", ");
                for state in &query.states {
                    states.push_bind(state.as_str());
                }
                states.push_unseparated(")");
            }
            builder.push(" ORDER BY trigger_name, trigger_group");

            let rows: Vec<(String, String)> = builder
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            return Ok(rows
                .into_iter()
                .map(|(name, group)| TriggerKey::new(name, group))
                .filter(|key| {
                    query
                        .group
                        .as_ref()
                        .is_none_or(|matcher| matcher.matches(key.group()))
                })
                .collect());
        }

        Ok(self
            .fetch_triggers(query)
            .await?
            .into_iter()
            .map(|t| t.trigger.key().clone())
            .collect())
    }

    async fn query_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>, StorageError> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT job_name, job_group FROM jobs WHERE 1 = 1");
        push_group_filter(&mut builder, "job_group", matcher);
        builder.push(" ORDER BY job_name, job_group");

        let rows: Vec<(String, String)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .filter(|(_, group)| matcher.matches(group))
            .map(|(name, group)| JobKey::new(name, group))
            .collect())
    }

    async fn job_group_names(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT job_group FROM jobs ORDER BY job_group")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(group,)| group).collect())
    }

    async fn trigger_group_names(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT trigger_group FROM triggers ORDER BY trigger_group")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(group,)| group).collect())
    }

    async fn count_jobs(&self) -> Result<usize, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn count_triggers(&self) -> Result<usize, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM triggers")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for mutation in batch {
            match mutation {
                Mutation::PutJob(job) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO jobs (job_group, job_name, document) VALUES (?, ?, ?)",
                    )
                    .bind(job.key().group())
                    .bind(job.key().name())
                    .bind(encode(&job)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
                Mutation::DeleteJob(key) => {
                    sqlx::query("DELETE FROM jobs WHERE job_group = ? AND job_name = ?")
                        .bind(key.group())
                        .bind(key.name())
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
                Mutation::PutTrigger(stored) => {
                    let trigger = &stored.trigger;
                    sqlx::query(
                        r#"
                        INSERT OR REPLACE INTO triggers (
                            trigger_group, trigger_name, job_group, job_name, calendar_name,
                            state, next_fire_time, priority, document
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(trigger.key().group())
                    .bind(trigger.key().name())
                    .bind(trigger.job_key().group())
                    .bind(trigger.job_key().name())
                    .bind(trigger.calendar_name())
                    .bind(stored.state.as_str())
                    .bind(trigger.next_fire_time().map(|t| t.timestamp_millis()))
                    .bind(trigger.priority())
                    .bind(encode(trigger)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
                Mutation::DeleteTrigger(key) => {
                    sqlx::query("DELETE FROM triggers WHERE trigger_group = ? AND trigger_name = ?")
                        .bind(key.group())
                        .bind(key.name())
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
                Mutation::PutScheduler(record) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO schedulers (instance_name, document) VALUES (?, ?)",
                    )
                    .bind(&record.instance_name)
                    .bind(encode(&record)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
