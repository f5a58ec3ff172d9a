//! Enable or disable forging on a node.

use crate::{
    node::Node,
    transport::{bounded, Transport},
};
use std::time::Duration;
use tracing::{error, info};

/// Issues forging toggles and reports the state each node confirms.
#[derive(Clone)]
pub struct Toggler<T: Transport> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Toggler<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Request that `node` sets its forging flag to `enabled` and return the state the
    /// node reports afterwards.
    ///
    /// Any failure (transport error, non-success status, timeout) yields `false`. Callers
    /// must compare the result with the requested state: a false negative can only cause
    /// an extra rollback, never two forging nodes.
    pub async fn set_forging(&self, node: &Node, enabled: bool) -> bool {
        match bounded(self.timeout, self.transport.set_forging(node, enabled)).await {
            Ok(confirmed) => {
                info!(%node, requested = enabled, confirmed, "set forging status");
                confirmed
            }
            Err(err) => {
                error!(%node, requested = enabled, ?err, "failed to set forging status");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{Call, Network};

    #[tokio::test]
    async fn test_confirmed_state() {
        let network = Network::default();
        let a = Node::new("http://a");
        network.add_node(&a, false, 100);
        let toggler = Toggler::new(network.clone(), Duration::from_secs(1));

        assert!(toggler.set_forging(&a, true).await);
        assert!(network.is_forging(&a));
        assert!(!toggler.set_forging(&a, false).await);
        assert!(!network.is_forging(&a));
        assert_eq!(
            network.toggles(),
            vec![Call::SetForging(a.clone(), true), Call::SetForging(a, false)]
        );
    }

    #[tokio::test]
    async fn test_refused_enable() {
        let network = Network::default();
        let a = Node::new("http://a");
        network.add_node(&a, false, 100);
        network.set_stuck(&a, true);
        let toggler = Toggler::new(network.clone(), Duration::from_secs(1));

        // The node acknowledges but reports it is still not forging
        assert!(!toggler.set_forging(&a, true).await);
        assert!(!network.is_forging(&a));
    }

    #[tokio::test]
    async fn test_unreachable_is_false() {
        let network = Network::default();
        let a = Node::new("http://a");
        network.add_node(&a, true, 100);
        network.set_reachable(&a, false);
        let toggler = Toggler::new(network.clone(), Duration::from_secs(1));

        assert!(!toggler.set_forging(&a, true).await);
        assert!(network.is_forging(&a));
    }
}
