//! Decide whether to rotate the forging node and perform the handover.
//!
//! Each [Controller::run] walks the following states:
//!
//! ```txt
//! IDLE -> EVALUATING -> NO-OP
//!                    -> FORCED-ROTATE   -> COMMITTED | ROLLED-BACK
//!                    -> INTERVAL-ROTATE -> COMMITTED | ROLLED-BACK
//! ```
//!
//! A rotation is forced when no rotation has ever completed (bootstrap) or when the active
//! node cannot be made to forge. Otherwise a rotation happens once the shuffle interval has
//! elapsed and the delegate's position in the forging queue permits it.
//!
//! The handover enables the replacement, disables the previous node, and persists the new
//! state. If any of the three cannot be confirmed, both toggles are reverted and the state
//! backup taken at the start of the run is restored.

use crate::{
    config::Config,
    node::{Node, Pool},
    notify::{fire, Event, Notifier},
    prober::Prober,
    selection::Policy,
    state::{Backup, RotationState, Store},
    toggle::Toggler,
    transport::Transport,
    Error,
};
use rand::Rng;
use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{error, info, warn};

/// Why a rotation was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// No rotation has ever completed.
    Bootstrap,
    /// The active node could not be made to forge.
    Unhealthy,
    /// The shuffle interval elapsed.
    Interval,
}

impl Trigger {
    /// Forced rotations skip the queue check and do not disable the previous node
    /// (which may be unreachable or nonexistent).
    pub fn forced(&self) -> bool {
        !matches!(self, Self::Interval)
    }
}

/// Why a run ended without rotating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    /// The shuffle interval has not elapsed since the last rotation.
    IntervalNotElapsed { elapsed: Duration },
    /// The delegate's position in the forging queue is above the configured minimum.
    Queue { position: usize },
    /// The delegate's position in the forging queue could not be determined.
    QueueUnknown,
}

/// Result of a run that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Skipped(Skip),
    Rotated {
        from: Node,
        to: Node,
        trigger: Trigger,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(Skip::IntervalNotElapsed { elapsed }) => write!(
                f,
                "skipped: last rotation was {} minutes ago",
                elapsed.as_secs() / 60
            ),
            Self::Skipped(Skip::Queue { position }) => {
                write!(f, "skipped: position {position} in forging queue")
            }
            Self::Skipped(Skip::QueueUnknown) => write!(f, "skipped: forging queue unknown"),
            Self::Rotated { from, to, trigger } => {
                write!(f, "rotated ({trigger:?}) from '{from}' to '{to}'")
            }
        }
    }
}

/// Milliseconds between the UNIX epoch and `time` (zero if `time` precedes it).
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Drives a single rotation run.
pub struct Controller<'a, T: Transport, S: Store, N: Notifier, R: Rng> {
    config: &'a Config,
    prober: Prober<T>,
    toggler: Toggler<T>,
    policy: Policy,
    store: S,
    notifier: N,
    rng: R,
}

impl<'a, T: Transport, S: Store, N: Notifier, R: Rng> Controller<'a, T, S, N, R> {
    pub fn new(config: &'a Config, transport: T, store: S, notifier: N, rng: R) -> Self {
        Self {
            config,
            prober: Prober::new(transport.clone(), config.timeout()),
            toggler: Toggler::new(transport, config.timeout()),
            policy: Policy::new(config.minimum_consensus),
            store,
            notifier,
            rng,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluate the active node and rotate to a member of `candidates` if required.
    ///
    /// Expected failures (no API, no replacement, unconfirmed handover) are returned as
    /// errors after any compensation has been attempted.
    pub async fn run(&mut self, candidates: &Pool, now: SystemTime) -> Result<Outcome, Error> {
        // Snapshot the persisted state before anything can mutate it
        let backup = self.store.backup()?;
        let state = self.store.load()?;
        let previous = state.active_node.clone();

        // Select an API and check the delegate's missed blocks
        let api = self.prober.select_api(&self.config.apis()).await;
        let missed_blocks = match &api {
            Some(api) => self.prober.missed_blocks(api, &self.config.public_key).await,
            None => None,
        };
        if let (Some(threshold), Some(missed)) = (self.config.missed_blocks, missed_blocks) {
            if missed > threshold {
                error!(missed, threshold, "delegate has missed a block");
                fire(&self.notifier, Event::BlockAlert).await;
            }
        }

        // Verify the active node is forging and that no other node is
        let trigger = if state.initialized {
            info!("no rotation has completed yet, forcing rotation");
            Some(Trigger::Bootstrap)
        } else if self.ensure_forging_status(&previous).await {
            Some(Trigger::Unhealthy)
        } else {
            None
        };
        if !state.initialized {
            self.prevent_double_forging(&previous, candidates).await;
        }

        // Decide whether to rotate
        let trigger = match trigger {
            Some(trigger) => trigger,
            None => {
                let elapsed = Duration::from_millis(
                    epoch_millis(now).saturating_sub(state.last_rotation_timestamp),
                );
                info!(minutes = elapsed.as_secs() / 60, "time since last rotation");
                if elapsed <= self.config.shuffle_interval() {
                    info!(
                        interval = self.config.shuffle_interval,
                        "shuffle interval not reached, skipping rotation"
                    );
                    return Ok(Outcome::Skipped(Skip::IntervalNotElapsed { elapsed }));
                }
                Trigger::Interval
            }
        };
        let Some(api) = api else {
            error!("no apis available");
            fire(&self.notifier, Event::ApiWarning).await;
            return Err(Error::NoHealthyApi);
        };
        if !trigger.forced() {
            match self.prober.queue_position(&api, &self.config.public_key).await {
                Some(position) if position <= self.config.minimum_queue => {}
                Some(position) => {
                    info!(
                        position,
                        minimum = self.config.minimum_queue,
                        "position in forging queue above minimum, skipping rotation"
                    );
                    return Ok(Outcome::Skipped(Skip::Queue { position }));
                }
                None => {
                    warn!("forging queue unknown, skipping rotation");
                    return Ok(Outcome::Skipped(Skip::QueueUnknown));
                }
            }
        }

        // Pick a replacement
        info!(?trigger, "rotating");
        let Some(replacement) = self
            .policy
            .select(&self.prober, &mut self.rng, candidates, &previous)
            .await
        else {
            error!("no forgers available");
            fire(&self.notifier, Event::Alert).await;
            return Err(Error::NoEligibleReplacement);
        };

        // Hand over
        let next = RotationState {
            active_node: replacement.clone(),
            last_rotation_timestamp: epoch_millis(now),
            initialized: false,
            missed_blocks: missed_blocks.or(state.missed_blocks),
        };
        self.commit(&previous, &replacement, trigger, next, backup).await?;
        if trigger == Trigger::Unhealthy {
            fire(
                &self.notifier,
                Event::Warning {
                    from: previous.clone(),
                    to: replacement.clone(),
                },
            )
            .await;
        }
        Ok(Outcome::Rotated {
            from: previous,
            to: replacement,
            trigger,
        })
    }

    /// Make sure `node` is forging, re-enabling it up to `max_retries` times.
    ///
    /// Returns true if the node is still not forging afterwards (a rotation must be forced).
    pub async fn ensure_forging_status(&self, node: &Node) -> bool {
        info!(%node, "checking active forging node");
        if self.prober.forging_status(node).await == Some(true) {
            return false;
        }

        let max_retries = self.config.max_retries;
        for attempt in 1..=max_retries {
            warn!(%node, attempt, max_retries, "active node not forging, re-enabling");
            if self.toggler.set_forging(node, true).await {
                info!(%node, attempt, "re-enabled forging on active node");
                return false;
            }
            let interval = self.config.retry_interval();
            if attempt < max_retries && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
        warn!(%node, max_retries, "active node is unhealthy");
        true
    }

    /// Disable forging on every candidate other than `active` that reports it is forging.
    ///
    /// Best effort: a node that cannot be disabled is logged and skipped.
    pub async fn prevent_double_forging(&self, active: &Node, candidates: &Pool) {
        info!("verifying that other nodes are not forging");
        for node in candidates.excluding(active) {
            if self.prober.forging_status(node).await != Some(true) {
                continue;
            }
            warn!(%node, "standby node is forging, disabling");
            if self.toggler.set_forging(node, false).await {
                error!(%node, "standby node is still forging");
            }
        }
    }

    /// Enable `replacement`, disable `previous` (unless the rotation is forced), and persist
    /// `next`. Rolls back if any step is not confirmed.
    async fn commit(
        &mut self,
        previous: &Node,
        replacement: &Node,
        trigger: Trigger,
        next: RotationState,
        backup: Backup,
    ) -> Result<(), Error> {
        let replacement_enabled = self.toggler.set_forging(replacement, true).await;
        let previous_disabled = if trigger.forced() {
            info!(%previous, ?trigger, "skipping disable of previous node");
            true
        } else {
            !self.toggler.set_forging(previous, false).await
        };
        let persisted = match self.store.save(&next) {
            Ok(()) => true,
            Err(err) => {
                error!(?err, "failed to persist state");
                false
            }
        };
        if replacement_enabled && previous_disabled && persisted {
            info!(from = %previous, to = %replacement, "rotation committed");
            return Ok(());
        }

        error!(
            replacement_enabled,
            previous_disabled, persisted, "rotation not confirmed, reverting to original state"
        );
        self.rollback(previous, replacement, backup).await;
        if replacement_enabled && previous_disabled {
            return Err(Error::PersistenceFailure("state not saved".into()));
        }
        Err(Error::PartialCommit {
            replacement_enabled,
            previous_disabled,
            persisted,
        })
    }

    /// Return both nodes and the persisted state to how they were before the handover.
    async fn rollback(&mut self, previous: &Node, replacement: &Node, backup: Backup) {
        if self.toggler.set_forging(replacement, false).await {
            error!(node = %replacement, "replacement still forging after rollback");
        }
        if !previous.is_empty() && !self.toggler.set_forging(previous, true).await {
            error!(node = %previous, "previous node not forging after rollback");
        }
        match self.store.restore(backup) {
            Ok(()) => info!("restored state backup"),
            Err(err) => error!(?err, "failed to restore state backup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{Call, Memory, Network, Recorder};
    use rand::{rngs::StdRng, SeedableRng};

    const KEY: &str = "delegate";
    const MINUTE: u64 = 60_000;
    const LAST: u64 = 1_700_000_000_000;

    fn config(max_retries: usize) -> Config {
        Config {
            public_key: KEY.into(),
            password: "secret".into(),
            apis: vec!["http://api".into()],
            forgers: vec![],
            external_forgers: vec![],
            shuffle_interval: 60,
            minimum_consensus: 51,
            minimum_queue: 10,
            max_retries,
            missed_blocks: None,
            timeout_ms: 1_000,
            retry_interval_ms: 0,
            state_path: "state.json".into(),
            webhook: None,
        }
    }

    fn at(millis: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(millis)
    }

    #[test]
    fn test_epoch_millis() {
        assert_eq!(epoch_millis(at(LAST)), LAST);
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_forced() {
        assert!(Trigger::Bootstrap.forced());
        assert!(Trigger::Unhealthy.forced());
        assert!(!Trigger::Interval.forced());
    }

    #[tokio::test]
    async fn test_ensure_forging_status_bounded() {
        let network = Network::default();
        let a = Node::new("http://a");
        network.add_node(&a, false, 100);
        network.set_stuck(&a, true);
        let config = config(4);
        let controller = Controller::new(
            &config,
            network.clone(),
            Memory::default(),
            Recorder::default(),
            StdRng::seed_from_u64(0),
        );

        assert!(controller.ensure_forging_status(&a).await);
        assert_eq!(network.toggles().len(), 4);
    }

    #[tokio::test]
    async fn test_ensure_forging_status_recovers() {
        let network = Network::default();
        let a = Node::new("http://a");
        network.add_node(&a, false, 100);
        let config = config(3);
        let controller = Controller::new(
            &config,
            network.clone(),
            Memory::default(),
            Recorder::default(),
            StdRng::seed_from_u64(0),
        );

        assert!(!controller.ensure_forging_status(&a).await);
        assert_eq!(network.toggles(), vec![Call::SetForging(a.clone(), true)]);
        assert!(network.is_forging(&a));

        // Already forging: nothing to do
        network.clear_calls();
        assert!(!controller.ensure_forging_status(&a).await);
        assert!(network.toggles().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_forging_status_no_retries() {
        let network = Network::default();
        let a = Node::new("http://a");
        network.add_node(&a, false, 100);
        let config = config(0);
        let controller = Controller::new(
            &config,
            network.clone(),
            Memory::default(),
            Recorder::default(),
            StdRng::seed_from_u64(0),
        );

        assert!(controller.ensure_forging_status(&a).await);
        assert!(network.toggles().is_empty());
    }

    #[tokio::test]
    async fn test_prevent_double_forging() {
        let network = Network::default();
        let a = Node::new("http://a");
        let b = Node::new("http://b");
        let c = Node::new("http://c");
        let d = Node::new("http://d");
        network.add_node(&a, true, 100);
        network.add_node(&b, true, 100);
        network.add_node(&c, false, 100);
        network.add_node(&d, true, 100);
        network.set_stuck(&d, true);
        let config = config(3);
        let controller = Controller::new(
            &config,
            network.clone(),
            Memory::default(),
            Recorder::default(),
            StdRng::seed_from_u64(0),
        );

        let pool = Pool::new(["http://a", "http://b", "http://c", "http://d", "http://e"]);
        controller.prevent_double_forging(&a, &pool).await;

        // The sweep disables b, leaves a alone, and tolerates d refusing and e missing
        assert_eq!(
            network.toggles(),
            vec![
                Call::SetForging(b.clone(), false),
                Call::SetForging(d.clone(), false)
            ]
        );
        assert_eq!(network.forging_nodes(), vec![a, d]);
    }

    #[tokio::test]
    async fn test_save_failure_rolls_back() {
        let network = Network::default();
        let api = Node::new("http://api");
        let a = Node::new("http://a");
        let b = Node::new("http://b");
        network.add_api(&api, true);
        network.add_node(&a, true, 100);
        network.add_node(&b, false, 100);
        network.set_queue(vec![KEY.into()]);

        let store = Memory::with_state(&RotationState {
            active_node: a.clone(),
            last_rotation_timestamp: LAST,
            initialized: false,
            missed_blocks: None,
        });
        let before = store.bytes();
        store.set_fail_saves(true);

        let config = config(3);
        let mut controller = Controller::new(
            &config,
            network.clone(),
            store.clone(),
            Recorder::default(),
            StdRng::seed_from_u64(0),
        );
        let pool = Pool::new(["http://a", "http://b"]);
        let result = controller.run(&pool, at(LAST + 61 * MINUTE)).await;

        assert!(matches!(result, Err(Error::PersistenceFailure(_))));
        assert_eq!(store.bytes(), before);
        assert_eq!(store.restores(), 1);
        assert_eq!(network.forging_nodes(), vec![a]);
    }

    #[test]
    fn test_outcome_display() {
        let skipped = Outcome::Skipped(Skip::IntervalNotElapsed {
            elapsed: Duration::from_secs(125),
        });
        assert_eq!(skipped.to_string(), "skipped: last rotation was 2 minutes ago");
        let rotated = Outcome::Rotated {
            from: Node::new("http://a"),
            to: Node::new("http://b"),
            trigger: Trigger::Interval,
        };
        assert_eq!(
            rotated.to_string(),
            "rotated (Interval) from 'http://a' to 'http://b'"
        );
    }
}
