//! Per-dispatch log rows.

use sqlx::SqlitePool;

/// One finished dispatch, ready for insertion.
///
/// All fields are owned so the write can move into `tokio::spawn`.
#[derive(Debug, Clone)]
pub struct DispatchLog {
    pub correlation_id: String,
    pub timestamp: String,
    pub pool: String,
    /// Channel that answered; `None` on failure
    pub channel: Option<String>,
    pub streaming: bool,
    pub attempts: i64,
    pub latency_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

impl DispatchLog {
    pub async fn insert(&self, db: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO dispatch_log (
                correlation_id, timestamp, pool, channel, streaming,
                attempts, latency_ms, success, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.correlation_id)
        .bind(&self.timestamp)
        .bind(&self.pool)
        .bind(self.channel.as_deref())
        .bind(self.streaming)
        .bind(self.attempts)
        .bind(self.latency_ms)
        .bind(self.success)
        .bind(self.error_message.as_deref())
        .execute(db)
        .await?;
        Ok(())
    }
}

/// Fire-and-forget write; failures are logged, not propagated.
pub fn spawn_log_write(db: &SqlitePool, log: DispatchLog) {
    let db = db.clone();
    tokio::spawn(async move {
        if let Err(e) = log.insert(&db).await {
            tracing::warn!(
                correlation_id = %log.correlation_id,
                error = %e,
                "Failed to write dispatch log"
            );
        }
    });
}
