//! Sources of candidate forging nodes.
//!
//! Candidates come from the inline list in the configuration and from any number of
//! external JSON documents (each a JSON array of node URLs). A source that cannot be read
//! contributes nothing; only an empty combined pool aborts the run.

use crate::{config::Config, node::Pool, Error};
use reqwest::Client;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{error, info};

/// Location of an external candidate list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Url(String),
}

impl Source {
    /// Interpret `location` as a URL if it has an HTTP(S) scheme, otherwise as a path.
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Url(location.to_string())
        } else {
            Self::File(PathBuf::from(location))
        }
    }

    /// Fetch the node URLs listed by this source.
    pub async fn fetch(&self, client: &Client) -> Result<Vec<String>, Error> {
        match self {
            Self::File(path) => {
                let bytes = fs::read(path)?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            Self::Url(url) => {
                let response = client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Status(status.as_u16()));
                }
                Ok(response.json().await?)
            }
        }
    }
}

/// Combine `inline` candidates with those listed by every `external` source.
pub async fn collect(
    client: &Client,
    inline: &[String],
    external: &[String],
) -> Result<Pool, Error> {
    let mut urls = inline.to_vec();
    if !inline.is_empty() {
        info!(count = inline.len(), "read forgers from config");
    }
    for location in external {
        let source = Source::parse(location);
        match source.fetch(client).await {
            Ok(listed) => {
                info!(?source, count = listed.len(), "read forgers from source");
                urls.extend(listed);
            }
            Err(err) => {
                error!(?source, ?err, "could not read forgers from source");
            }
        }
    }
    let pool = Pool::new(urls);
    if pool.is_empty() {
        return Err(Error::EmptyPool);
    }
    info!(count = pool.len(), "total forgers found");
    Ok(pool)
}

/// Collect the candidate pool described by `config`.
pub async fn candidates(config: &Config) -> Result<Pool, Error> {
    let client = client(config.timeout())?;
    collect(&client, &config.forgers, &config.external_forgers).await
}

/// Build a client for fetching external lists with the given timeout.
pub fn client(timeout: Duration) -> Result<Client, Error> {
    Ok(Client::builder().timeout(timeout).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn test_parse() {
        assert_eq!(
            Source::parse("https://example.com/forgers.json"),
            Source::Url("https://example.com/forgers.json".into())
        );
        assert_eq!(
            Source::parse(" lists/forgers.json "),
            Source::File(PathBuf::from("lists/forgers.json"))
        );
    }

    #[tokio::test]
    async fn test_collect_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let broken = dir.path().join("broken.json");
        fs::write(&first, r#"["http://b:7000/", "http://c:7000"]"#).unwrap();
        fs::write(&broken, "not json").unwrap();

        let client = client(Duration::from_secs(1)).unwrap();
        let inline = vec!["http://a:7000".to_string(), "http://b:7000".to_string()];
        let external = vec![
            first.display().to_string(),
            broken.display().to_string(),
            dir.path().join("missing.json").display().to_string(),
        ];
        let pool = collect(&client, &inline, &external).await.unwrap();
        let nodes: Vec<_> = pool.iter().map(Node::as_str).collect();
        assert_eq!(nodes, vec!["http://a:7000", "http://b:7000", "http://c:7000"]);
    }

    #[tokio::test]
    async fn test_collect_empty() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        fs::write(&empty, "[]").unwrap();

        let client = client(Duration::from_secs(1)).unwrap();
        let external = vec![empty.display().to_string()];
        assert!(matches!(
            collect(&client, &[], &external).await,
            Err(Error::EmptyPool)
        ));
    }
}
