use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::precompiles::{PrecompileProvider, Precompiles};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hardfork {
    Cancun,
    #[default]
    Prague,
}

impl std::str::FromStr for Hardfork {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cancun" => Ok(Self::Cancun),
            "prague" => Ok(Self::Prague),
            _ => Err(eyre::eyre!("Unsupported hardfork: '{s}'.")),
        }
    }
}

impl std::fmt::Display for Hardfork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancun => f.write_str("Cancun"),
            Self::Prague => f.write_str("Prague"),
        }
    }
}

/// Immutable execution configuration, built once per hardfork and shared by
/// reference with the gas meter, interpreter and transaction executor.
#[derive(Clone, Debug)]
pub struct Config {
    pub hardfork: Hardfork,
    pub chain_id: u64,
    /// Blob transactions and BLOBHASH / BLOBBASEFEE.
    pub eip4844: bool,
    /// Calldata floor cost.
    pub eip7623: bool,
    /// Set-code transactions and delegation designators.
    pub eip7702: bool,
    pub max_blobs_per_block: usize,
    pub blob_base_fee_update_fraction: u64,
    pub precompiles: Precompiles,
}

impl Config {
    pub fn new(hardfork: Hardfork, chain_id: u64) -> Self {
        match hardfork {
            Hardfork::Cancun => Self {
                hardfork,
                chain_id,
                eip4844: true,
                eip7623: false,
                eip7702: false,
                max_blobs_per_block: 6,
                blob_base_fee_update_fraction: 3_338_477,
                precompiles: Precompiles::for_hardfork(hardfork),
            },
            Hardfork::Prague => Self {
                hardfork,
                chain_id,
                eip4844: true,
                eip7623: true,
                eip7702: true,
                max_blobs_per_block: 9,
                blob_base_fee_update_fraction: 5_007_716,
                precompiles: Precompiles::for_hardfork(hardfork),
            },
        }
    }

    pub fn cancun(chain_id: u64) -> Self {
        Self::new(Hardfork::Cancun, chain_id)
    }

    pub fn prague(chain_id: u64) -> Self {
        Self::new(Hardfork::Prague, chain_id)
    }

    /// Adds a custom provider that takes precedence over the built-in ones.
    pub fn with_precompiles(mut self, provider: Arc<dyn PrecompileProvider>) -> Self {
        self.precompiles = self.precompiles.with(provider);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Hardfork::default(), 1)
    }
}
