//! In-memory implementations of the external collaborators for testing.

use crate::{
    node::Node,
    notify::{Event, Notifier},
    state::{Backup, RotationState, Store},
    transport::Transport,
    Error,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Request observed by the [Network].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Forging(Node),
    SetForging(Node, bool),
    Consensus(Node),
}

#[derive(Clone, Copy, Debug)]
struct Peer {
    forging: bool,
    consensus: u8,
    reachable: bool,
    stuck: bool,
}

#[derive(Default)]
struct State {
    peers: BTreeMap<Node, Peer>,
    apis: BTreeMap<Node, bool>,
    missed_blocks: u64,
    queue: Vec<String>,
    delay: Duration,
    calls: Vec<Call>,
}

/// Simulated set of nodes and API endpoints.
///
/// Clones share the same underlying state, so a test can keep a handle while the
/// controller owns another.
#[derive(Clone, Default)]
pub struct Network {
    state: Arc<Mutex<State>>,
}

impl Network {
    /// Register a reachable node.
    pub fn add_node(&self, node: &Node, forging: bool, consensus: u8) {
        self.state.lock().unwrap().peers.insert(
            node.clone(),
            Peer {
                forging,
                consensus,
                reachable: true,
                stuck: false,
            },
        );
    }

    /// Register (or update) an API endpoint.
    pub fn add_api(&self, api: &Node, alive: bool) {
        self.state.lock().unwrap().apis.insert(api.clone(), alive);
    }

    pub fn set_reachable(&self, node: &Node, reachable: bool) {
        self.peer(node, |peer| peer.reachable = reachable);
    }

    /// A stuck node acknowledges toggles but never changes its forging flag.
    pub fn set_stuck(&self, node: &Node, stuck: bool) {
        self.peer(node, |peer| peer.stuck = stuck);
    }

    pub fn set_consensus(&self, node: &Node, consensus: u8) {
        self.peer(node, |peer| peer.consensus = consensus);
    }

    pub fn set_missed_blocks(&self, missed: u64) {
        self.state.lock().unwrap().missed_blocks = missed;
    }

    pub fn set_queue(&self, queue: Vec<String>) {
        self.state.lock().unwrap().queue = queue;
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn is_forging(&self, node: &Node) -> bool {
        self.state
            .lock()
            .unwrap()
            .peers
            .get(node)
            .is_some_and(|peer| peer.forging)
    }

    /// Nodes whose forging flag is set.
    pub fn forging_nodes(&self) -> Vec<Node> {
        self.state
            .lock()
            .unwrap()
            .peers
            .iter()
            .filter(|(_, peer)| peer.forging)
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Every node request observed so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Forging toggles observed so far.
    pub fn toggles(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SetForging(..)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn peer(&self, node: &Node, f: impl FnOnce(&mut Peer)) {
        let mut state = self.state.lock().unwrap();
        let peer = state.peers.get_mut(node).expect("unknown node");
        f(peer);
    }

    async fn delay(&self) {
        let delay = self.state.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Record `call` and return the peer it targets, if reachable.
    fn reach(&self, node: &Node, call: Call) -> Result<Peer, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.peers.get(node) {
            Some(peer) if peer.reachable => Ok(*peer),
            _ => Err(Error::Unreachable(node.to_string())),
        }
    }

    fn api(&self, api: &Node) -> Result<(), Error> {
        match self.state.lock().unwrap().apis.get(api) {
            Some(true) => Ok(()),
            Some(false) => Err(Error::Status(503)),
            None => Err(Error::Unreachable(api.to_string())),
        }
    }
}

impl Transport for Network {
    async fn forging(&self, node: &Node) -> Result<bool, Error> {
        self.delay().await;
        let peer = self.reach(node, Call::Forging(node.clone()))?;
        Ok(peer.forging)
    }

    async fn set_forging(&self, node: &Node, enabled: bool) -> Result<bool, Error> {
        self.delay().await;
        let peer = self.reach(node, Call::SetForging(node.clone(), enabled))?;
        if peer.stuck {
            return Ok(peer.forging);
        }
        self.peer(node, |peer| peer.forging = enabled);
        Ok(enabled)
    }

    async fn consensus(&self, node: &Node) -> Result<u8, Error> {
        self.delay().await;
        let peer = self.reach(node, Call::Consensus(node.clone()))?;
        Ok(peer.consensus)
    }

    async fn alive(&self, api: &Node) -> Result<(), Error> {
        self.delay().await;
        self.api(api)
    }

    async fn missed_blocks(&self, api: &Node, _public_key: &str) -> Result<u64, Error> {
        self.delay().await;
        self.api(api)?;
        Ok(self.state.lock().unwrap().missed_blocks)
    }

    async fn forgers(&self, api: &Node, limit: usize) -> Result<Vec<String>, Error> {
        self.delay().await;
        self.api(api)?;
        let state = self.state.lock().unwrap();
        Ok(state.queue.iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
struct Persisted {
    bytes: Option<Vec<u8>>,
    fail_saves: bool,
    saves: usize,
    restores: usize,
}

/// [Store] holding the encoded state in memory.
#[derive(Clone, Default)]
pub struct Memory {
    persisted: Arc<Mutex<Persisted>>,
}

impl Memory {
    /// Create a store that already holds `state`.
    pub fn with_state(state: &RotationState) -> Self {
        let store = Self::default();
        store.persisted.lock().unwrap().bytes = Some(state.encode().expect("encodable state"));
        store
    }

    /// Exact bytes currently persisted.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.persisted.lock().unwrap().bytes.clone()
    }

    /// Decoded state currently persisted.
    pub fn state(&self) -> Option<RotationState> {
        self.bytes()
            .map(|bytes| RotationState::decode(&bytes).expect("decodable state"))
    }

    /// Make every subsequent save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.persisted.lock().unwrap().fail_saves = fail;
    }

    pub fn saves(&self) -> usize {
        self.persisted.lock().unwrap().saves
    }

    pub fn restores(&self) -> usize {
        self.persisted.lock().unwrap().restores
    }
}

impl Store for Memory {
    fn load(&self) -> Result<RotationState, Error> {
        match self.bytes() {
            Some(bytes) => RotationState::decode(&bytes),
            None => Ok(RotationState::default()),
        }
    }

    fn save(&mut self, state: &RotationState) -> Result<(), Error> {
        let mut persisted = self.persisted.lock().unwrap();
        persisted.saves += 1;
        if persisted.fail_saves {
            return Err(Error::PersistenceFailure("injected".into()));
        }
        persisted.bytes = Some(state.encode()?);
        Ok(())
    }

    fn backup(&mut self) -> Result<Backup, Error> {
        Ok(Backup::new(self.bytes()))
    }

    fn restore(&mut self, backup: Backup) -> Result<(), Error> {
        let mut persisted = self.persisted.lock().unwrap();
        persisted.restores += 1;
        persisted.bytes = backup.bytes().map(<[u8]>::to_vec);
        Ok(())
    }
}

/// [Notifier] that records every event it is given.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    fail: Arc<Mutex<bool>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Make delivery fail (events are still recorded).
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl Notifier for Recorder {
    async fn notify(&self, event: &Event) -> Result<(), Error> {
        self.events.lock().unwrap().push(event.clone());
        if *self.fail.lock().unwrap() {
            return Err(Error::Unreachable("recorder".into()));
        }
        Ok(())
    }
}
