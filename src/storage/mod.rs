//! SQLite storage: provider registry, runtime settings and dispatch log.

pub mod logging;
pub mod providers;
pub mod settings;

pub use logging::{spawn_log_write, DispatchLog};
pub use providers::{NewProvider, ProviderRecord, ProviderUpdate};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::Result;

/// Open the database and apply migrations.
///
/// The file is created if missing and opened in WAL mode.
pub async fn init_pool(db_path: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    migrate(&db).await?;
    Ok(db)
}

/// Apply embedded migrations to an already-open pool.
pub async fn migrate(db: &SqlitePool) -> Result<()> {
    sqlx::migrate!().run(db).await?;
    Ok(())
}
