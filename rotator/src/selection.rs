//! Random selection of a replacement forger.

use crate::{
    node::{Node, Pool},
    prober::Prober,
    transport::Transport,
};
use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info};

/// Picks replacements uniformly at random among candidates that are sufficiently in
/// consensus with the network.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    minimum_consensus: u8,
}

impl Policy {
    pub fn new(minimum_consensus: u8) -> Self {
        Self { minimum_consensus }
    }

    /// Whether a node reporting `consensus` may take over forging.
    ///
    /// The comparison is strict: a node sitting exactly at the threshold is rejected.
    pub fn eligible(&self, consensus: u8) -> bool {
        consensus > self.minimum_consensus
    }

    /// Select a replacement for `excluding` from `candidates`.
    ///
    /// Candidates are shuffled and then probed one at a time until one is eligible.
    /// Returns `None` once every candidate has been rejected.
    pub async fn select<T: Transport, R: Rng>(
        &self,
        prober: &Prober<T>,
        rng: &mut R,
        candidates: &Pool,
        excluding: &Node,
    ) -> Option<Node> {
        let mut available: Vec<Node> = candidates.excluding(excluding).cloned().collect();
        available.shuffle(rng);
        info!(candidates = available.len(), "selecting a new random forger");

        while let Some(candidate) = available.pop() {
            let consensus = prober.consensus(&candidate).await;
            if self.eligible(consensus) {
                info!(node = %candidate, consensus, "selected new forger");
                return Some(candidate);
            }
            debug!(
                node = %candidate,
                consensus,
                minimum = self.minimum_consensus,
                "consensus too low"
            );
        }
        None
    }
}
