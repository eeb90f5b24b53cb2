//! Interaction matching
//!
//! Finds a recorded interaction for a live request. Among all candidates
//! that satisfy the parameter predicate one is drawn uniformly at random;
//! the draw comes from a seedable RNG so tests can pin it.

use crate::events::{ParamMap, RecordedInteraction};
use crate::params::RequestParams;
use crate::store::{InteractionStore, StoreResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

/// Selects recorded interactions for incoming requests
pub struct Matcher {
    store: Arc<dyn InteractionStore>,
    rng: Mutex<StdRng>,
}

impl Matcher {
    /// Create a matcher seeded from OS entropy
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a matcher with a fixed seed (reproducible selections)
    pub fn with_seed(store: Arc<dyn InteractionStore>, seed: u64) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Seeded when `seed` is set, entropy otherwise
    pub fn from_seed(store: Arc<dyn InteractionStore>, seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(store, seed),
            None => Self::new(store),
        }
    }

    pub fn store(&self) -> &Arc<dyn InteractionStore> {
        &self.store
    }

    /// Find an interaction for `endpoint` whose parameters match `params`
    pub fn find_match(
        &self,
        table: &str,
        endpoint: &str,
        params: &RequestParams,
    ) -> StoreResult<Option<RecordedInteraction>> {
        let candidates = self
            .store
            .find(table, endpoint, &|stored: &ParamMap| params.matches(stored))?;
        debug!(
            "{} candidate(s) for endpoint={} in table={}",
            candidates.len(),
            endpoint,
            table
        );
        Ok(self.pick(candidates))
    }

    /// Find any interaction recorded for `endpoint`, ignoring parameters
    pub fn find_any(&self, table: &str, endpoint: &str) -> StoreResult<Option<RecordedInteraction>> {
        let candidates = self.store.find_any(table, endpoint)?;
        debug!(
            "{} fallback candidate(s) for endpoint={} in table={}",
            candidates.len(),
            endpoint,
            table
        );
        Ok(self.pick(candidates))
    }

    /// Draw one candidate uniformly at random
    pub fn pick(&self, mut candidates: Vec<RecordedInteraction>) -> Option<RecordedInteraction> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..candidates.len());
        Some(candidates.swap_remove(index))
    }
}
