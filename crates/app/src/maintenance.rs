use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use soderia_storage::Database;

const BATCH_LIMIT: i64 = 500;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Background worker that deletes expired refresh tokens.
#[derive(Clone)]
pub struct MaintenanceWorker {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
}

impl MaintenanceWorker {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            clock: Arc::new(Utc::now),
            interval: DEFAULT_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "maintenance", error = %err, "maintenance run failed");
            }
        }
    }

    /// Sweeps expired refresh tokens in batches. Returns the number of rows removed.
    pub async fn run_once(&self) -> Result<u64, MaintenanceError> {
        let now = (self.clock)();
        let repo = self.database.refresh_tokens();
        let mut deleted = 0u64;

        loop {
            match repo.delete_expired_batch(now, BATCH_LIMIT).await {
                Ok(0) => break,
                Ok(batch) => {
                    deleted += batch;
                    counter!("db_ttl_deleted_total", "table" => "refresh_tokens").increment(batch);
                }
                Err(err) if is_sqlite_busy(&err) => {
                    counter!("db_busy_total", "op" => "ttl").increment(1);
                    warn!(stage = "maintenance", error = %err, "refresh token sweep hit busy timeout");
                    break;
                }
                Err(err) => return Err(MaintenanceError::TtlDelete { source: err }),
            }
        }

        info!(
            stage = "maintenance",
            table = "refresh_tokens",
            deleted,
            now = %now.to_rfc3339(),
            "expired refresh tokens swept"
        );
        Ok(deleted)
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("failed to delete expired refresh tokens")]
    TtlDelete {
        #[source]
        source: SqlxError,
    },
}

fn is_sqlite_busy(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => matches!(db_err.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}
