//! Backpressure Guard
//!
//! Reads the store client's pending-operation count before any store I/O.
//! A store that is already backed up gets no new work: the request is
//! answered from the upstream alone.

use crate::domain::ports::StoreClient;
use crate::error::{Error, Result};

/// High-water-mark check in front of the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackpressureGuard {
    /// Overrides the client's own threshold when set
    high_water_mark: Option<usize>,
}

impl BackpressureGuard {
    pub fn new(high_water_mark: Option<usize>) -> Self {
        Self { high_water_mark }
    }

    /// Threshold in force for `client`.
    pub fn limit(&self, client: &dyn StoreClient, key: &str) -> usize {
        self.high_water_mark
            .unwrap_or_else(|| client.load_for(key).high_water_mark)
    }

    /// `Ok(())` when the store may be used for `key`.
    ///
    /// The returned error is meant for the error-reporting channel, never
    /// for the caller.
    pub fn admit(&self, client: &dyn StoreClient, key: &str) -> Result<()> {
        let load = client.load_for(key);
        let limit = self.high_water_mark.unwrap_or(load.high_water_mark);
        if load.pending < limit {
            Ok(())
        } else {
            Err(Error::HighWaterMark {
                pending: load.pending,
                limit,
            })
        }
    }

    pub fn admissible(&self, client: &dyn StoreClient, key: &str) -> bool {
        self.admit(client, key).is_ok()
    }
}
