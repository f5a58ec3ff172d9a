use thiserror::Error;

/// Errors that can occur while rotating the forging node.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timeout")]
    Timeout,
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("candidate pool is empty")]
    EmptyPool,
    #[error("no healthy api available")]
    NoHealthyApi,
    #[error("no eligible replacement")]
    NoEligibleReplacement,
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error(
        "partial commit: replacement_enabled={replacement_enabled} previous_disabled={previous_disabled} persisted={persisted}"
    )]
    PartialCommit {
        replacement_enabled: bool,
        previous_disabled: bool,
        persisted: bool,
    },
    #[error("node {node} did not confirm forging={requested}")]
    Unconfirmed { node: String, requested: bool },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
