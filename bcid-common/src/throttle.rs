//! Cross-process request throttle with retry
//!
//! Several pipeline processes may query the same external service at once, so
//! admission state lives in a SQLite file rather than in memory. Each admitted
//! request writes one `(endpoint, timestamp_ms)` row; admission counts the rows
//! inside fixed-size windows that are deliberately wider than the rate they
//! guard (2 s for per-second limits, 90 s for per-minute limits), so the
//! throttle errs towards under-admission.
//!
//! The check-count-then-insert sequence runs inside `BEGIN IMMEDIATE`, which
//! takes SQLite's write lock up front and makes double admission impossible.

use crate::config::ThrottleSettings;
use crate::error::RequestError;
use crate::{Error, Result};
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Window used to enforce a requests-per-second limit
pub const PER_SECOND_WINDOW_MS: i64 = 2_000;
/// Window used to enforce a requests-per-minute limit
pub const PER_MINUTE_WINDOW_MS: i64 = 90_000;

/// Rate limits for one named endpoint. At least one limit must be set;
/// when both are set both must be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointQuota {
    pub name: String,
    pub requests_per_second: Option<u32>,
    pub requests_per_minute: Option<u32>,
}

impl EndpointQuota {
    pub fn per_second(name: &str, rps: u32) -> Self {
        Self {
            name: name.to_string(),
            requests_per_second: Some(rps),
            requests_per_minute: None,
        }
    }

    pub fn per_minute(name: &str, rpm: u32) -> Self {
        Self {
            name: name.to_string(),
            requests_per_second: None,
            requests_per_minute: Some(rpm),
        }
    }

    /// GBIF endpoints that are expensive server-side (occurrence facets)
    pub fn gbif_slow() -> Self {
        Self::per_second("gbif_slow", 1)
    }

    pub fn gbif_fast() -> Self {
        Self::per_second("gbif_fast", 10)
    }

    pub fn entrez(rps: u32) -> Self {
        Self::per_second("entrez", rps)
    }

    pub fn bold() -> Self {
        Self {
            name: "bold".to_string(),
            requests_per_second: Some(5),
            requests_per_minute: Some(50),
        }
    }

    fn validate(&self) -> Result<()> {
        let positive = |v: Option<u32>| v.map(|n| n > 0).unwrap_or(false);
        if !positive(self.requests_per_second) && !positive(self.requests_per_minute) {
            return Err(Error::Config(format!(
                "Endpoint '{}' must set requests_per_second or requests_per_minute",
                self.name
            )));
        }
        Ok(())
    }

    /// Rows older than this can never affect admission again
    fn retention_ms(&self) -> i64 {
        if self.requests_per_minute.is_some() {
            PER_MINUTE_WINDOW_MS
        } else {
            PER_SECOND_WINDOW_MS
        }
    }
}

/// Shared admission table. Open once per process and hand out
/// [`Throttle`]s per endpoint.
#[derive(Debug, Clone)]
pub struct ThrottleStore {
    pool: SqlitePool,
}

impl ThrottleStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let newly_created = !db_path.exists();

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS throttle_requests (
                endpoint TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_throttle_endpoint_ts \
             ON throttle_requests(endpoint, timestamp_ms)",
        )
        .execute(&pool)
        .await?;

        if newly_created {
            info!(path = %db_path.display(), "Created throttle database");
        } else {
            debug!(path = %db_path.display(), "Opened throttle database");
        }
        Ok(Self { pool })
    }

    /// Throttle for one endpoint, with the retry policy from `settings`.
    pub fn endpoint(&self, quota: EndpointQuota, settings: &ThrottleSettings) -> Result<Throttle> {
        quota.validate()?;
        Ok(Throttle {
            pool: self.pool.clone(),
            quota,
            settings: settings.clone(),
        })
    }
}

/// Admission control and retry policy for one endpoint
#[derive(Debug, Clone)]
pub struct Throttle {
    pool: SqlitePool,
    quota: EndpointQuota,
    settings: ThrottleSettings,
}

impl Throttle {
    pub fn name(&self) -> &str {
        &self.quota.name
    }

    /// Wait until one more request to this endpoint stays within its quota,
    /// and record it.
    pub async fn acquire(&self) -> Result<()> {
        let started = Instant::now();
        let interval = self.settings.progress_interval();
        let mut next_report = interval;

        loop {
            if self.try_admit().await? {
                return Ok(());
            }

            // ThreadRng is !Send; draw before awaiting
            let jitter_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(self.settings.jitter_min_ms..=self.settings.jitter_max_ms)
            };
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

            let waited = started.elapsed();
            if !interval.is_zero() && waited >= next_report {
                info!(
                    endpoint = %self.quota.name,
                    waited_secs = waited.as_secs(),
                    "Awaiting throttle release"
                );
                next_report = waited + interval;
            }
        }
    }

    /// One admission attempt. `Ok(false)` means over quota or the write lock
    /// was contended; callers back off and retry.
    pub async fn try_admit(&self) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;

        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
            if is_busy(&e) {
                return Ok(false);
            }
            return Err(e.into());
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        match self.admit_in_transaction(&mut conn, now_ms).await {
            Ok(true) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(true)
            }
            Ok(false) => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(endpoint = %self.quota.name, error = %rollback_err, "Throttle rollback failed");
                }
                if is_busy(&e) {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn admit_in_transaction(
        &self,
        conn: &mut SqliteConnection,
        now_ms: i64,
    ) -> std::result::Result<bool, sqlx::Error> {
        let endpoint = self.quota.name.as_str();

        sqlx::query("DELETE FROM throttle_requests WHERE endpoint = ? AND timestamp_ms < ?")
            .bind(endpoint)
            .bind(now_ms - self.quota.retention_ms())
            .execute(&mut *conn)
            .await?;

        if let Some(rps) = self.quota.requests_per_second {
            let (observed,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM throttle_requests WHERE endpoint = ? AND timestamp_ms >= ?",
            )
            .bind(endpoint)
            .bind(now_ms - PER_SECOND_WINDOW_MS)
            .fetch_one(&mut *conn)
            .await?;
            if observed >= i64::from(rps) {
                return Ok(false);
            }
        }

        if let Some(rpm) = self.quota.requests_per_minute {
            let (observed,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM throttle_requests WHERE endpoint = ? AND timestamp_ms >= ?",
            )
            .bind(endpoint)
            .bind(now_ms - PER_MINUTE_WINDOW_MS)
            .fetch_one(&mut *conn)
            .await?;
            if observed >= i64::from(rpm) {
                return Ok(false);
            }
        }

        sqlx::query("INSERT INTO throttle_requests (endpoint, timestamp_ms) VALUES (?, ?)")
            .bind(endpoint)
            .bind(now_ms)
            .execute(&mut *conn)
            .await?;
        Ok(true)
    }

    /// Run `operation` behind the throttle, retrying transient failures.
    ///
    /// - Up to `max_attempts` tries with a fixed backoff between them.
    /// - A rate-limited response resets the attempt budget and waits
    ///   `rate_limit_backoff` before the next try.
    /// - A not-found response is returned at once (lookup miss, not a fault).
    /// - Running out of attempts yields [`Error::ApiExhausted`].
    pub async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut remaining = max_attempts;

        loop {
            self.acquire().await?;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(RequestError::NotFound(what)) => {
                    return Err(Error::Request(RequestError::NotFound(what)));
                }
                Err(e) if e.is_rate_limited() => {
                    remaining = max_attempts;
                    warn!(
                        endpoint = %self.quota.name,
                        backoff_secs = self.settings.rate_limit_backoff().as_secs(),
                        "API rate limit exceeded, backing off before next attempt"
                    );
                    tokio::time::sleep(self.settings.rate_limit_backoff()).await;
                }
                Err(e) => {
                    remaining -= 1;
                    if remaining == 0 {
                        error!(
                            endpoint = %self.quota.name,
                            attempts = max_attempts,
                            error = %e,
                            "Request failed after all attempts"
                        );
                        return Err(Error::ApiExhausted {
                            endpoint: self.quota.name.clone(),
                            attempts: max_attempts,
                            last: e,
                        });
                    }
                    warn!(
                        endpoint = %self.quota.name,
                        remaining,
                        error = %e,
                        "Request failed, will retry after backoff"
                    );
                    tokio::time::sleep(self.settings.retry_backoff()).await;
                }
            }
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            message.contains("database is locked") || message.contains("busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
