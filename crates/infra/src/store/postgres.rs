//! Postgres-backed coordination store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent start lost the race on `jobs_single_active` |
//! | Database (other) | Any other | `Query` | Other database errors |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` | Store unreachable |
//! | ColumnDecode / ColumnNotFound | N/A | `Corrupt` | Row does not match the schema |
//! | Other | N/A | `Query` | Anything else |
//!
//! ## Locking
//!
//! - `ledger_view` and `processed_count` are plain reads and take no row locks.
//! - `pause_active` / `resume_paused` lock the active job row (`FOR UPDATE`) so
//!   concurrent pause and resume calls serialize on it.
//! - `claim_batch` locks up to `limit` unprocessed items with
//!   `FOR UPDATE SKIP LOCKED`: concurrent claimers partition the unprocessed set
//!   without waiting on each other and never receive the same row.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, Span};

use async_trait::async_trait;

use batchline_core::{ItemId, JobId, JobRecord, LedgerView, ProcessableItem};

use super::schema::SCHEMA;
use super::{ClaimError, ClaimOutcome, CoordinationStore, StartOutcome, StoreError};
use crate::bus::NOTIFY_CHANNEL;
use crate::workload::ItemWorkload;

/// Coordination store on the shared Postgres database.
///
/// Cheap to clone; all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresCoordinationStore {
    pool: PgPool,
    channel: String,
}

impl PostgresCoordinationStore {
    /// Create a store publishing on [`NOTIFY_CHANNEL`].
    pub fn new(pool: PgPool) -> Self {
        Self::with_channel(pool, NOTIFY_CHANNEL)
    }

    pub fn with_channel(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Insert unprocessed items; returns their ids in insertion order.
    #[instrument(skip(self, inputs), fields(count = inputs.len()), err)]
    pub async fn insert_items(&self, inputs: &[(i64, i64)]) -> Result<Vec<ItemId>, StoreError> {
        let mut tx = self.begin("insert_items").await?;
        let mut ids = Vec::with_capacity(inputs.len());

        for &(first, second) in inputs {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO processables (first, second) VALUES ($1, $2) RETURNING id",
            )
            .bind(first)
            .bind(second)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_items", e))?;
            ids.push(ItemId::from_raw(id));
        }

        commit(tx, "insert_items").await?;
        Ok(ids)
    }

    #[instrument(skip(self), err)]
    pub async fn load_ledger(&self) -> Result<LedgerView, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(id) FROM jobs) AS total_jobs,
                a.id,
                a.started,
                a.paused,
                a.ended
            FROM (SELECT 1) AS one
            LEFT JOIN LATERAL (
                SELECT id, started, paused, ended
                FROM jobs
                WHERE started IS NOT NULL AND ended IS NULL
                LIMIT 1
            ) AS a ON TRUE
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_view", e))?;

        let total_jobs: i64 = row
            .try_get("total_jobs")
            .map_err(|e| map_sqlx_error("ledger_view", e))?;
        let id: Option<i64> = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("ledger_view", e))?;

        let active = match id {
            Some(id) => Some(JobRecord {
                id: JobId::from_raw(id),
                started_at: row
                    .try_get("started")
                    .map_err(|e| map_sqlx_error("ledger_view", e))?,
                paused_at: row
                    .try_get("paused")
                    .map_err(|e| map_sqlx_error("ledger_view", e))?,
                ended_at: row
                    .try_get("ended")
                    .map_err(|e| map_sqlx_error("ledger_view", e))?,
            }),
            None => None,
        };

        Ok(LedgerView {
            total_jobs: total_jobs.max(0) as u64,
            active,
        })
    }

    /// Start the job unless one is active.
    ///
    /// This method:
    /// 1. Starts a transaction
    /// 2. Looks for the active job; if found, commits without writing
    /// 3. Inserts a job with `started = now`
    /// 4. Publishes the start notification (delivered on commit)
    /// 5. Commits
    ///
    /// If a concurrent transaction inserts first, the partial unique index
    /// rejects this insert; the winner's job is re-read and reported as
    /// already active.
    #[instrument(skip(self), fields(job_id), err)]
    pub async fn start(&self) -> Result<StartOutcome, StoreError> {
        let mut tx = self.begin("start_job").await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE started IS NOT NULL AND ended IS NULL",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("start_job", e))?;

        if let Some(id) = existing {
            commit(tx, "start_job").await?;
            Span::current().record("job_id", id);
            return Ok(StartOutcome::AlreadyActive(JobId::from_raw(id)));
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO jobs (started) VALUES ($1) RETURNING id",
        )
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                rollback(tx, "start_job").await?;
                debug!("lost the start race, joining the winner's job");
                return self.active_after_conflict().await;
            }
            Err(e) => {
                rollback(tx, "start_job").await?;
                return Err(map_sqlx_error("start_job", e));
            }
        };

        self.notify(&mut tx, "start_job").await?;
        commit(tx, "start_job").await?;

        Span::current().record("job_id", id);
        Ok(StartOutcome::Started(JobId::from_raw(id)))
    }

    #[instrument(skip(self), fields(job_id), err)]
    pub async fn pause(&self) -> Result<Option<JobId>, StoreError> {
        let mut tx = self.begin("pause_active").await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE started IS NOT NULL AND ended IS NULL AND paused IS NULL
            FOR UPDATE
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("pause_active", e))?;

        let Some(id) = id else {
            commit(tx, "pause_active").await?;
            return Ok(None);
        };

        sqlx::query("UPDATE jobs SET paused = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("pause_active", e))?;

        commit(tx, "pause_active").await?;
        Span::current().record("job_id", id);
        Ok(Some(JobId::from_raw(id)))
    }

    #[instrument(skip(self), fields(job_id), err)]
    pub async fn resume(&self) -> Result<Option<JobId>, StoreError> {
        let mut tx = self.begin("resume_paused").await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE started IS NOT NULL AND ended IS NULL AND paused IS NOT NULL
            FOR UPDATE
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("resume_paused", e))?;

        let Some(id) = id else {
            commit(tx, "resume_paused").await?;
            return Ok(None);
        };

        sqlx::query("UPDATE jobs SET paused = NULL WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("resume_paused", e))?;

        self.notify(&mut tx, "resume_paused").await?;
        commit(tx, "resume_paused").await?;

        Span::current().record("job_id", id);
        Ok(Some(JobId::from_raw(id)))
    }

    /// Claim, process and commit one batch.
    ///
    /// The transaction is rolled back (explicitly, or by dropping it when the
    /// caller's timeout cancels this future) on any failure, which releases
    /// every claimed row.
    #[instrument(
        skip(self, workload),
        fields(job_id = %job, claimed),
        err
    )]
    pub async fn claim(
        &self,
        job: JobId,
        limit: usize,
        workload: &dyn ItemWorkload,
    ) -> Result<ClaimOutcome, ClaimError> {
        let mut tx = self.begin("claim_batch").await?;

        let paused: Option<DateTime<Utc>> =
            sqlx::query_scalar::<_, Option<DateTime<Utc>>>("SELECT paused FROM jobs WHERE id = $1")
                .bind(job.as_raw())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("claim_batch", e))?
                .flatten();

        if paused.is_some() {
            commit(tx, "claim_batch").await?;
            return Ok(ClaimOutcome::Paused);
        }

        let rows = sqlx::query(
            r#"
            SELECT id, first, second
            FROM processables
            WHERE result IS NULL
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_batch", e))?;

        if rows.is_empty() {
            commit(tx, "claim_batch").await?;
            return Ok(ClaimOutcome::Exhausted);
        }

        let mut batch = Vec::with_capacity(rows.len());
        for row in &rows {
            batch.push(ProcessableItem::pending(
                ItemId::from_raw(row.try_get("id").map_err(|e| map_sqlx_error("claim_batch", e))?),
                row.try_get("first").map_err(|e| map_sqlx_error("claim_batch", e))?,
                row.try_get("second").map_err(|e| map_sqlx_error("claim_batch", e))?,
            ));
        }

        for item in &batch {
            let result = match workload.process(item).await {
                Ok(result) => result,
                Err(e) => {
                    rollback(tx, "claim_batch").await?;
                    return Err(ClaimError::Workload(e));
                }
            };

            sqlx::query("UPDATE processables SET result = $1 WHERE id = $2")
                .bind(result)
                .bind(item.id.as_raw())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("claim_batch", e))?;
        }

        commit(tx, "claim_batch").await?;

        Span::current().record("claimed", batch.len());
        Ok(ClaimOutcome::Claimed(batch.into_iter().map(|i| i.id).collect()))
    }

    #[instrument(skip(self), fields(job_id = %job), err)]
    pub async fn complete(&self, job: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE jobs SET ended = $1 WHERE id = $2 AND ended IS NULL")
            .bind(Utc::now())
            .bind(job.as_raw())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("complete_job", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn count_processed(&self) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(id) FROM processables WHERE result IS NOT NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("processed_count", e))?;

        Ok(count.max(0) as u64)
    }

    async fn begin(&self, operation: &'static str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn notify(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        operation: &'static str,
    ) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_notify($1, '')")
            .bind(&self.channel)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }

    async fn active_after_conflict(&self) -> Result<StartOutcome, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE started IS NOT NULL AND ended IS NULL",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("start_job", e))?;

        match id {
            Some(id) => Ok(StartOutcome::AlreadyActive(JobId::from_raw(id))),
            // The winner already finished; let the caller try again.
            None => Err(StoreError::Conflict {
                operation: "start_job",
                message: "concurrent start finished before it could be joined".to_string(),
            }),
        }
    }
}

async fn commit(tx: Transaction<'_, Postgres>, operation: &'static str) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
}

async fn rollback(tx: Transaction<'_, Postgres>, operation: &'static str) -> Result<(), StoreError> {
    tx.rollback().await.map_err(|e| map_sqlx_error(operation, e))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict { operation, message },
                _ => StoreError::Query { operation, message },
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_)) => {
            StoreError::Corrupt {
                operation,
                message: e.to_string(),
            }
        }
        other => StoreError::Query {
            operation,
            message: other.to_string(),
        },
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// Implement CoordinationStore trait

#[async_trait]
impl CoordinationStore for PostgresCoordinationStore {
    async fn ledger_view(&self) -> Result<LedgerView, StoreError> {
        self.load_ledger().await
    }

    async fn start_job(&self) -> Result<StartOutcome, StoreError> {
        self.start().await
    }

    async fn pause_active(&self) -> Result<Option<JobId>, StoreError> {
        self.pause().await
    }

    async fn resume_paused(&self) -> Result<Option<JobId>, StoreError> {
        self.resume().await
    }

    async fn claim_batch(
        &self,
        job: JobId,
        limit: usize,
        workload: &dyn ItemWorkload,
    ) -> Result<ClaimOutcome, ClaimError> {
        self.claim(job, limit, workload).await
    }

    async fn complete_job(&self, job: JobId) -> Result<bool, StoreError> {
        self.complete(job).await
    }

    async fn processed_count(&self) -> Result<u64, StoreError> {
        self.count_processed().await
    }
}
