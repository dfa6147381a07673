//! Current pool snapshots and the rebuild operation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use super::builder::build_channels;
use super::channel::{Channel, Pool};
use super::PoolType;
use crate::error::Result;
use crate::storage::providers;

/// Holds one immutable [`Pool`] per pool type.
///
/// Readers clone the `Arc` and never observe a partially built list. Rebuilds
/// of one pool type are serialized so a slower, older registry read cannot
/// overwrite a newer snapshot; different pool types rebuild independently.
pub struct PoolManager {
    db: SqlitePool,
    pools: DashMap<PoolType, Arc<Pool>>,
    rebuild_locks: HashMap<PoolType, Mutex<()>>,
}

impl PoolManager {
    /// Create a manager with every pool empty. Call [`rebuild_all`](Self::rebuild_all) to load.
    pub fn new(db: SqlitePool) -> Self {
        let pools = DashMap::with_capacity(PoolType::ALL.len());
        let mut rebuild_locks = HashMap::with_capacity(PoolType::ALL.len());
        for pool_type in PoolType::ALL {
            pools.insert(pool_type, Arc::new(Pool::empty(pool_type)));
            rebuild_locks.insert(pool_type, Mutex::new(()));
        }
        Self {
            db,
            pools,
            rebuild_locks,
        }
    }

    /// The current snapshot for `pool_type`.
    pub fn snapshot(&self, pool_type: PoolType) -> Arc<Pool> {
        self.pools
            .get(&pool_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::new(Pool::empty(pool_type)))
    }

    /// Swap in a fully built channel list.
    pub fn install(&self, pool_type: PoolType, channels: Vec<Channel>) -> Arc<Pool> {
        let pool = Arc::new(Pool::new(pool_type, channels));
        self.pools.insert(pool_type, pool.clone());
        pool
    }

    /// Re-read enabled records for `pool_type` and replace its snapshot.
    pub async fn rebuild(&self, pool_type: PoolType) -> Result<Arc<Pool>> {
        let _guard = match self.rebuild_locks.get(&pool_type) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let records = providers::list_enabled(&self.db, pool_type).await?;
        let pool = self.install(pool_type, build_channels(&records));

        match pool.head() {
            Some(head) => tracing::info!(
                pool = %pool_type,
                channels = pool.len(),
                head = %head.id,
                provider = %head.provider_name,
                "Pool rebuilt"
            ),
            None => tracing::info!(pool = %pool_type, head = "no channels", "Pool rebuilt"),
        }

        Ok(pool)
    }

    /// Rebuild every pool type.
    pub async fn rebuild_all(&self) -> Result<()> {
        for pool_type in PoolType::ALL {
            self.rebuild(pool_type).await?;
        }
        Ok(())
    }

    /// Fire-and-forget rebuild; failures are logged, never returned.
    pub fn spawn_rebuild(self: &Arc<Self>, pool_type: PoolType) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.rebuild(pool_type).await {
                tracing::warn!(pool = %pool_type, error = %e, "Background pool rebuild failed");
            }
        });
    }

    /// Channel counts per pool, for health reporting.
    pub fn sizes(&self) -> Vec<(PoolType, usize)> {
        PoolType::ALL
            .iter()
            .map(|&pool_type| (pool_type, self.snapshot(pool_type).len()))
            .collect()
    }
}
