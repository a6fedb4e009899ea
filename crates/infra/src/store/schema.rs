//! Persisted schema.
//!
//! The nullability of the timestamp columns and of `result` is load-bearing:
//! - `jobs.started IS NOT NULL AND jobs.ended IS NULL` marks the active job
//! - `jobs.paused IS NOT NULL` marks a paused job
//! - `processables.result IS NULL` marks an unprocessed item

/// Idempotent DDL for the job ledger and the item table.
///
/// `jobs_single_active` makes the active-job invariant hold even when two
/// start transactions both observe an empty ledger: the second insert fails
/// with a unique violation instead of creating a second active job.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id      BIGSERIAL PRIMARY KEY,
    started TIMESTAMPTZ NULL,
    paused  TIMESTAMPTZ NULL,
    ended   TIMESTAMPTZ NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS jobs_single_active
    ON jobs ((started IS NOT NULL))
    WHERE started IS NOT NULL AND ended IS NULL;

CREATE TABLE IF NOT EXISTS processables (
    id     BIGSERIAL PRIMARY KEY,
    first  BIGINT NOT NULL,
    second BIGINT NOT NULL,
    result BIGINT NULL
);

CREATE INDEX IF NOT EXISTS processables_unprocessed
    ON processables (id)
    WHERE result IS NULL;
"#;
