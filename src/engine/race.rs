//! Race strategy.
//!
//! The store lookup and the upstream fetch run concurrently and whichever
//! produces a usable answer first is delivered. Once both branches have
//! completed, the upstream result is written back if it differs from what
//! the store held.
//!
//! ```text
//!   store  ──get──► cached ─┐
//!                           ├─► first usable answer ─► caller (once)
//!   upstream ─fetch► current┘
//!                           └─► both done && cached != current ─► write
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{EngineInner, Lookup};
use crate::domain::ports::{FetchResult, SourceError};
use crate::expiry::Resolution;

/// What the store branch found.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StoreSlot {
    /// Absent or undecodable
    Miss,
    Value(Bytes),
}

#[derive(Debug, Default)]
struct Slots {
    /// Set when the store branch completes without a store error
    cached: Option<StoreSlot>,
    /// Set when the upstream branch completes; inner `None` is "do not cache"
    current: Option<Option<Bytes>>,
}

impl Slots {
    /// Value to write back, once both slots are filled.
    ///
    /// Only the branch that fills the second slot can observe both, so the
    /// write is issued at most once.
    fn finalize(&self) -> Option<Bytes> {
        match (&self.cached, &self.current) {
            (Some(cached), Some(Some(current))) => match cached {
                StoreSlot::Value(held) if held == current => None,
                _ => Some(current.clone()),
            },
            _ => None,
        }
    }
}

/// Per-request state shared by both branches.
struct Race {
    /// Taken by whichever branch answers; empty once sent
    answer: Mutex<Option<oneshot::Sender<FetchResult>>>,
    slots: Mutex<Slots>,
}

impl Race {
    fn new() -> (Arc<Self>, oneshot::Receiver<FetchResult>) {
        let (tx, rx) = oneshot::channel();
        let race = Arc::new(Self {
            answer: Mutex::new(Some(tx)),
            slots: Mutex::new(Slots::default()),
        });
        (race, rx)
    }

    /// Deliver `result` unless an answer was already sent.
    fn answer(&self, result: FetchResult) -> bool {
        match self.answer.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn complete_store(&self, slot: StoreSlot) -> Option<Bytes> {
        let mut slots = self.slots.lock();
        slots.cached = Some(slot);
        slots.finalize()
    }

    fn complete_upstream(&self, current: Option<Bytes>) -> Option<Bytes> {
        let mut slots = self.slots.lock();
        slots.current = Some(current);
        slots.finalize()
    }
}

pub(crate) async fn run(
    inner: &Arc<EngineInner>,
    resource_id: &str,
    resolution: Resolution,
) -> FetchResult {
    let Resolution { key, ttl, .. } = resolution;
    let (race, rx) = Race::new();

    // Upstream branch always runs
    {
        let engine = inner.clone();
        let race = race.clone();
        let key = key.clone();
        let resource_id = resource_id.to_string();
        inner.spawn(async move {
            let result = engine.fetch(&resource_id).await;
            let current = engine.encode(&key, &result);
            let finalize = race.complete_upstream(current);

            if race.answer(result) {
                engine.metrics.record_miss();
            }
            if let Some(value) = finalize {
                debug!(key = %key, "Upstream differs from store, writing back");
                engine.write(&key, value, ttl).await;
            }
        });
    }

    // Store branch only when the store has room
    if inner.admit(&key) {
        let engine = inner.clone();
        let race = race.clone();
        inner.spawn(async move {
            let (slot, hit) = match engine.lookup(&key).await {
                // No slot: a store error never leads to a write
                Lookup::Failed => return,
                Lookup::Miss => (StoreSlot::Miss, None),
                Lookup::Hit(result, raw) => (StoreSlot::Value(raw), Some(result)),
            };
            let finalize = race.complete_store(slot);

            if let Some(result) = hit {
                if race.answer(result) {
                    debug!(key = %key, "Store answered first");
                    engine.metrics.record_hit();
                }
            }
            if let Some(value) = finalize {
                debug!(key = %key, "Store is stale, writing back");
                engine.write(&key, value, ttl).await;
            }
        });
    }

    match rx.await {
        Ok(result) => result,
        Err(_) => {
            warn!(resource_id = %resource_id, "Race ended without an answer");
            Err(SourceError::new("upstream fetch did not complete"))
        }
    }
}
