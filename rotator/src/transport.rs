//! Opaque RPC seam to a node's management API.
//!
//! Every method returns the raw outcome of a single call. Converting failures into
//! conservative sentinels is the job of the [crate::prober::Prober] and the
//! [crate::toggle::Toggler], not of the transport.

use crate::{node::Node, Error};
use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::{future::Future, time::Duration};

/// Number of upcoming forgers requested when looking up the delegate's queue position.
pub const FORGING_QUEUE_LIMIT: usize = 101;

/// Interface to the management and delegate API of a node.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Fetch whether `node` is currently forging.
    fn forging(&self, node: &Node) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Request that `node` enables (or disables) forging and return the state the node
    /// reports after applying the request.
    fn set_forging(
        &self,
        node: &Node,
        enabled: bool,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Fetch the percentage of the network `node` is in consensus with.
    fn consensus(&self, node: &Node) -> impl Future<Output = Result<u8, Error>> + Send;

    /// Check that `api` answers its status endpoint successfully.
    fn alive(&self, api: &Node) -> impl Future<Output = Result<(), Error>> + Send;

    /// Fetch the number of blocks missed by the delegate with `public_key`.
    fn missed_blocks(
        &self,
        api: &Node,
        public_key: &str,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Fetch the public keys of the next `limit` forgers, in forging order.
    fn forgers(
        &self,
        api: &Node,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send;
}

/// Await `call`, failing with [Error::Timeout] if it does not complete within `timeout`.
///
/// Applied on top of any timeout the transport enforces itself so that no call can
/// suspend the controller indefinitely.
pub(crate) async fn bounded<F, V>(timeout: Duration, call: F) -> Result<V, Error>
where
    F: Future<Output = Result<V, Error>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(Error::Timeout))
}

/// Response envelope used by every endpoint.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ForgingStatus {
    forging: bool,
}

#[derive(Deserialize)]
struct NodeStatus {
    consensus: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Delegate {
    missed_blocks: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Forger {
    public_key: String,
}

/// [Transport] over HTTP/JSON.
#[derive(Clone)]
pub struct Http {
    client: Client,
    public_key: String,
    password: String,
}

impl Http {
    /// Create a transport that applies `timeout` to every request and authenticates
    /// forging toggles with the delegate's credentials.
    pub fn new(timeout: Duration, public_key: String, password: String) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            public_key,
            password,
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, Error> {
        let response = self
            .client
            .get(&url)
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| classify(&url, e))?;
        decode(&url, response).await
    }
}

/// Map a request failure onto the transport taxonomy.
fn classify(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else if err.is_connect() {
        Error::Unreachable(url.to_string())
    } else {
        Error::Http(err)
    }
}

/// Reject non-success statuses and unwrap the response envelope.
async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, Error> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Status(status.as_u16()));
    }
    let envelope: Envelope<T> = response.json().await.map_err(|e| classify(url, e))?;
    Ok(envelope.data)
}

fn first_forging(statuses: Vec<ForgingStatus>) -> Result<bool, Error> {
    statuses
        .into_iter()
        .next()
        .map(|status| status.forging)
        .ok_or(Error::Malformed("empty forging status"))
}

impl Transport for Http {
    async fn forging(&self, node: &Node) -> Result<bool, Error> {
        let statuses: Vec<ForgingStatus> = self.get(node.endpoint("node/status/forging")).await?;
        first_forging(statuses)
    }

    async fn set_forging(&self, node: &Node, enabled: bool) -> Result<bool, Error> {
        let url = node.endpoint("node/status/forging");
        let response = self
            .client
            .put(&url)
            .header(header::CACHE_CONTROL, "no-cache")
            .json(&json!({
                "publicKey": self.public_key,
                "password": self.password,
                "forging": enabled,
            }))
            .send()
            .await
            .map_err(|e| classify(&url, e))?;
        let statuses: Vec<ForgingStatus> = decode(&url, response).await?;
        first_forging(statuses)
    }

    async fn consensus(&self, node: &Node) -> Result<u8, Error> {
        let status: NodeStatus = self.get(node.endpoint("node/status")).await?;
        if !status.consensus.is_finite() {
            return Err(Error::Malformed("consensus is not a number"));
        }
        Ok(status.consensus.clamp(0.0, 100.0).floor() as u8)
    }

    async fn alive(&self, api: &Node) -> Result<(), Error> {
        let url = api.endpoint("node/status");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify(&url, e))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn missed_blocks(&self, api: &Node, public_key: &str) -> Result<u64, Error> {
        let url = format!("{}?publicKey={}", api.endpoint("delegates"), public_key);
        let delegates: Vec<Delegate> = self.get(url).await?;
        delegates
            .into_iter()
            .next()
            .map(|delegate| delegate.missed_blocks)
            .ok_or(Error::Malformed("delegate not found"))
    }

    async fn forgers(&self, api: &Node, limit: usize) -> Result<Vec<String>, Error> {
        let url = format!("{}?limit={}", api.endpoint("delegates/forgers"), limit);
        let forgers: Vec<Forger> = self.get(url).await?;
        Ok(forgers.into_iter().map(|forger| forger.public_key).collect())
    }
}
