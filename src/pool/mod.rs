//! Provider pools.
//!
//! A pool is the ordered channel list serving one logical purpose:
//! - `metadata`: structured extraction
//! - `analysis`: long-form deep analysis

mod builder;
mod channel;
mod manager;

pub use builder::build_channels;
pub use channel::{channel_id, host_of, Channel, Pool};
pub use manager::PoolManager;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Logical pool a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Metadata,
    Analysis,
}

impl PoolType {
    pub const ALL: [PoolType; 2] = [PoolType::Metadata, PoolType::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Metadata => "metadata",
            PoolType::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PoolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metadata" => Ok(PoolType::Metadata),
            "analysis" => Ok(PoolType::Analysis),
            _ => Err(Error::UnknownPool(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_type_round_trips_through_str() {
        for pool in PoolType::ALL {
            assert_eq!(pool.as_str().parse::<PoolType>().unwrap(), pool);
        }
        assert_eq!(" Metadata ".parse::<PoolType>().unwrap(), PoolType::Metadata);
    }

    #[test]
    fn unknown_pool_name_rejected() {
        assert!(matches!(
            "translation".parse::<PoolType>(),
            Err(Error::UnknownPool(name)) if name == "translation"
        ));
    }
}
