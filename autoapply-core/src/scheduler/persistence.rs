//! Postgres-backed job store and applicant source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::fmt;
use tracing::{info, trace, warn};
use uuid::Uuid;

use super::adapter::{ApplicantContext, ApplicantProfile, ApplicantSource, PasswordStrategy};
use super::events::{JobEvent, NewJobEvent, PROMOTION_MESSAGE};
use super::job::{JobId, JobRecord, JobStatus, JobTarget, NewJob};
use super::retry::Transition;
use super::store::JobStore;
use crate::error::{Result, SchedulerError};

const JOB_COLUMNS: &str = "id, target, job_title, company_name, detected_platform, status, \
     priority, retry_count, max_retries, created_at, last_attempted_at, ended_at, \
     error_details, last_status_message, result_artifact_path";

const EVENT_COLUMNS: &str = "id, job_id, ts, level, message, artifact_path";

/// SQLSTATE codes worth retrying a claim for.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Durable job store backed by Postgres.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    claim_conflict_retries: u32,
}

impl fmt::Debug for PostgresJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresJobStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("claim_conflict_retries", &self.claim_conflict_retries)
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    target: String,
    job_title: Option<String>,
    company_name: Option<String>,
    detected_platform: String,
    status: String,
    priority: i32,
    retry_count: i32,
    max_retries: i32,
    created_at: DateTime<Utc>,
    last_attempted_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error_details: Option<String>,
    last_status_message: Option<String>,
    result_artifact_path: Option<String>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = SchedulerError;

    fn try_from(row: JobRow) -> Result<Self> {
        let id = row.id;
        let corrupt = |what: &str, e: &dyn fmt::Display| {
            SchedulerError::Internal(format!("job {id} has invalid {what}: {e}"))
        };
        Ok(JobRecord {
            id: JobId(id),
            target: JobTarget::parse(&row.target).map_err(|e| corrupt("target", &e))?,
            detected_platform: row
                .detected_platform
                .parse()
                .map_err(|e| corrupt("platform", &e))?,
            status: row.status.parse().map_err(|e| corrupt("status", &e))?,
            priority: row.priority,
            retry_count: u32::try_from(row.retry_count).map_err(|e| corrupt("retry_count", &e))?,
            max_retries: u32::try_from(row.max_retries).map_err(|e| corrupt("max_retries", &e))?,
            job_title: row.job_title,
            company_name: row.company_name,
            created_at: row.created_at,
            last_attempted_at: row.last_attempted_at,
            ended_at: row.ended_at,
            error_details: row.error_details,
            last_status_message: row.last_status_message,
            result_artifact_path: row.result_artifact_path,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    job_id: Uuid,
    ts: DateTime<Utc>,
    level: String,
    message: String,
    artifact_path: Option<String>,
}

impl TryFrom<EventRow> for JobEvent {
    type Error = SchedulerError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(JobEvent {
            id: row.id,
            job_id: JobId(row.job_id),
            timestamp: row.ts,
            level: row.level.parse().map_err(|e| {
                SchedulerError::Internal(format!("event {} has invalid level: {e}", row.id))
            })?,
            message: row.message,
            artifact_path: row.artifact_path,
        })
    }
}

fn to_i32(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| SchedulerError::InvalidInput(format!("{field} {value} is out of range")))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn is_claim_conflict(err: &SchedulerError) -> bool {
    match err {
        SchedulerError::Database(db) => db
            .as_database_error()
            .and_then(|e| e.code())
            .is_some_and(|code| code == SERIALIZATION_FAILURE || code == DEADLOCK_DETECTED),
        _ => false,
    }
}

impl PostgresJobStore {
    /// Wraps `pool` after verifying the database answers. Failure here is
    /// fatal to process start.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                SchedulerError::Internal(format!("Job store failed Postgres health check: {e}"))
            })?;
        info!("Job store connected to Postgres");

        Ok(Self {
            pool,
            claim_conflict_retries: 3,
        })
    }

    pub fn with_claim_conflict_retries(mut self, retries: u32) -> Self {
        self.claim_conflict_retries = retries;
        self
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await?;
        info!("Job store migrations applied");
        Ok(())
    }

    async fn fetch_job_tx(tx: &mut Transaction<'_, Postgres>, id: JobId) -> Result<JobRecord> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(SchedulerError::NotFound(id))?
            .try_into()
    }

    /// Locks the row and checks it is still `processing`.
    async fn lock_processing_tx(tx: &mut Transaction<'_, Postgres>, id: JobId) -> Result<()> {
        let status: String =
            sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?
                .ok_or(SchedulerError::NotFound(id))?;
        let actual: JobStatus = status.parse()?;
        if actual != JobStatus::Processing {
            return Err(SchedulerError::Conflict {
                id,
                expected: JobStatus::Processing,
                actual,
            });
        }
        Ok(())
    }

    /// Appends an event and refreshes `last_status_message` in one statement.
    /// The timestamp never goes backwards for a given job.
    async fn append_event_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: JobId,
        event: &NewJobEvent,
    ) -> Result<JobEvent> {
        let sql = format!(
            r#"
            WITH touched AS (
                UPDATE jobs SET last_status_message = $5
                WHERE id = $1
                RETURNING id
            )
            INSERT INTO job_events (job_id, ts, level, message, artifact_path)
            SELECT touched.id,
                   GREATEST(
                       clock_timestamp(),
                       COALESCE(
                           (SELECT MAX(ts) FROM job_events WHERE job_id = $1),
                           '-infinity'::timestamptz
                       )
                   ),
                   $2, $3, $4
            FROM touched
            RETURNING {EVENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(id.as_uuid())
            .bind(event.level.as_str())
            .bind(&event.message)
            .bind(event.artifact_path.as_deref())
            .bind(event.status_line())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(SchedulerError::NotFound(id))?
            .try_into()
    }

    async fn try_claim(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM jobs
            WHERE status = 'queued'
            ORDER BY priority ASC, created_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(to_limit(limit))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        // Strictly after creation even when the clock has not moved.
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing',
                last_attempted_at = GREATEST(clock_timestamp(), created_at + interval '1 microsecond')
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        let promotion = NewJobEvent::info(PROMOTION_MESSAGE);
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let id = JobId(id);
            Self::append_event_tx(&mut tx, id, &promotion).await?;
            claimed.push(Self::fetch_job_tx(&mut tx, id).await?);
        }

        tx.commit().await?;
        trace!(claimed = claimed.len(), "claimed queued jobs");
        Ok(claimed)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn submit(&self, job: NewJob) -> Result<JobRecord> {
        let record = JobRecord::from_new(job, Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, target, job_title, company_name, detected_platform,
                status, priority, retry_count, max_retries, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.target.as_str())
        .bind(record.job_title.as_deref())
        .bind(record.company_name.as_deref())
        .bind(record.detected_platform.as_str())
        .bind(record.status.as_str())
        .bind(record.priority)
        .bind(to_i32(record.max_retries, "max_retries")?)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        let submitted = NewJobEvent::info(format!("Job submitted for {}", record.target));
        Self::append_event_tx(&mut tx, record.id, &submitted).await?;
        let stored = Self::fetch_job_tx(&mut tx, record.id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get(&self, id: JobId) -> Result<JobRecord> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulerError::NotFound(id))?
            .try_into()
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(to_limit(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(JobRecord::try_from)
            .collect()
    }

    async fn count_processing(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'processing'")
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn claim_eligible(&self, limit: usize) -> Result<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut attempt = 0;
        loop {
            match self.try_claim(limit).await {
                Err(err) if is_claim_conflict(&err) && attempt < self.claim_conflict_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "claim hit a transaction conflict; retrying");
                }
                result => return result,
            }
        }
    }

    async fn release_claim(&self, id: JobId, reason: &str) -> Result<JobRecord> {
        let mut tx = self.pool.begin().await?;
        Self::lock_processing_tx(&mut tx, id).await?;

        sqlx::query("UPDATE jobs SET status = 'queued' WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::append_event_tx(
            &mut tx,
            id,
            &NewJobEvent::warn(format!("Returned to queue: {reason}")),
        )
        .await?;

        let job = Self::fetch_job_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn apply_transition(&self, id: JobId, transition: &Transition) -> Result<JobRecord> {
        let mut tx = self.pool.begin().await?;
        Self::lock_processing_tx(&mut tx, id).await?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                retry_count = $3,
                error_details = $4,
                result_artifact_path = COALESCE($5, result_artifact_path),
                ended_at = CASE WHEN $6 THEN clock_timestamp() ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(transition.to.as_str())
        .bind(to_i32(transition.retry_count, "retry_count")?)
        .bind(transition.error_details.as_deref())
        .bind(transition.artifact_path.as_deref())
        .bind(transition.ends_job())
        .execute(&mut *tx)
        .await?;

        Self::append_event_tx(&mut tx, id, &transition.event).await?;
        let job = Self::fetch_job_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn append_event(&self, id: JobId, event: NewJobEvent) -> Result<JobEvent> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::append_event_tx(&mut tx, id, &event).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn job_events(&self, id: JobId) -> Result<Vec<JobEvent>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(SchedulerError::NotFound(id));
        }

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM job_events WHERE job_id = $1 ORDER BY ts ASC, id ASC"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(JobEvent::try_from)
            .collect()
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<JobEvent>> {
        let sql =
            format!("SELECT {EVENT_COLUMNS} FROM job_events ORDER BY ts DESC, id DESC LIMIT $1");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(to_limit(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(JobEvent::try_from)
            .collect()
    }
}

/// Reads the applicant profile and standard answers maintained by the
/// dashboard.
#[derive(Clone)]
pub struct PostgresApplicantSource {
    pool: PgPool,
}

impl fmt::Debug for PostgresApplicantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresApplicantSource")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresApplicantSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    resume_path: Option<String>,
    linkedin_url: Option<String>,
    website_url: Option<String>,
    default_email: Option<String>,
    password_strategy: String,
}

#[async_trait]
impl ApplicantSource for PostgresApplicantSource {
    async fn load(&self) -> Result<Option<ApplicantContext>> {
        let Some(row) = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT resume_path, linkedin_url, website_url, default_email, password_strategy
            FROM applicant_profiles
            ORDER BY id
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let answers: Vec<(String, String)> =
            sqlx::query_as("SELECT question, answer FROM standard_answers ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        let profile = ApplicantProfile {
            resume_path: row.resume_path,
            linkedin_url: row.linkedin_url,
            website_url: row.website_url,
            default_email: row.default_email,
            password_strategy: match row.password_strategy.as_str() {
                "ask" => PasswordStrategy::Ask,
                _ => PasswordStrategy::Generate,
            },
        };
        Ok(Some(ApplicantContext::new(profile, answers)))
    }
}
