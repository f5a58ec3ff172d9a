//! Read-only health probes.
//!
//! Probes never fail the caller: timeouts, connection failures, and malformed responses
//! are logged and converted into a conservative sentinel (`None` or `0`).

use crate::{
    node::{Node, Pool},
    transport::{bounded, Transport, FORGING_QUEUE_LIMIT},
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Issues bounded, read-only queries against nodes and API endpoints.
#[derive(Clone)]
pub struct Prober<T: Transport> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Prober<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Fetch whether `node` is forging. `None` means the node could not be reached
    /// or answered with something unreadable.
    pub async fn forging_status(&self, node: &Node) -> Option<bool> {
        match bounded(self.timeout, self.transport.forging(node)).await {
            Ok(forging) => {
                debug!(%node, forging, "fetched forging status");
                Some(forging)
            }
            Err(err) => {
                warn!(%node, ?err, "failed to fetch forging status");
                None
            }
        }
    }

    /// Fetch the consensus percentage reported by `node`, or `0` if it cannot be
    /// obtained (so a failed node never clears a positive threshold).
    pub async fn consensus(&self, node: &Node) -> u8 {
        match bounded(self.timeout, self.transport.consensus(node)).await {
            Ok(consensus) => {
                let consensus = consensus.min(100);
                info!(%node, consensus, "fetched consensus");
                consensus
            }
            Err(err) => {
                warn!(%node, ?err, "failed to fetch consensus");
                0
            }
        }
    }

    /// Fetch the delegate's missed block count.
    pub async fn missed_blocks(&self, api: &Node, public_key: &str) -> Option<u64> {
        match bounded(self.timeout, self.transport.missed_blocks(api, public_key)).await {
            Ok(missed) => {
                info!(missed, "fetched missed blocks");
                Some(missed)
            }
            Err(err) => {
                warn!(%api, ?err, "failed to fetch missed blocks");
                None
            }
        }
    }

    /// Fetch the delegate's index in the upcoming forging order.
    ///
    /// Returns `None` if the queue cannot be fetched or the delegate is not part of it.
    pub async fn queue_position(&self, api: &Node, public_key: &str) -> Option<usize> {
        let queue = self.transport.forgers(api, FORGING_QUEUE_LIMIT);
        let forgers = match bounded(self.timeout, queue).await {
            Ok(forgers) => forgers,
            Err(err) => {
                warn!(%api, ?err, "failed to fetch forging queue");
                return None;
            }
        };
        let Some(position) = forgers.iter().position(|key| key == public_key) else {
            warn!(queue = forgers.len(), "delegate not found in forging queue");
            return None;
        };
        info!(position, "fetched position in forging queue");
        Some(position)
    }

    /// Return the first API endpoint (in configured order) that answers its status check.
    pub async fn select_api(&self, apis: &Pool) -> Option<Node> {
        for api in apis {
            match bounded(self.timeout, self.transport.alive(api)).await {
                Ok(()) => {
                    info!(%api, "selected api");
                    return Some(api.clone());
                }
                Err(err) => {
                    warn!(%api, ?err, "api not available");
                }
            }
        }
        None
    }
}
