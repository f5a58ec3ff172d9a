//! Node identifiers and the candidate pool.

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};

/// Identifier of a node (or API endpoint): its base URL without trailing slashes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Node(String);

impl Node {
    /// Create a node from a URL, stripping any trailing slashes.
    pub fn new(url: impl AsRef<str>) -> Self {
        Self(url.as_ref().trim().trim_end_matches('/').to_string())
    }

    /// Returns the normalized URL.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty (no node recorded).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Join a path below `/api/` to the node's base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.0, path.trim_start_matches('/'))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Node> for String {
    fn from(value: Node) -> Self {
        value.0
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deduplicated, normalized set of nodes used for a single run.
///
/// Order of first appearance is preserved so that API endpoints are tried in the
/// order they were configured. The pool is recomputed every run and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pool {
    nodes: Vec<Node>,
}

impl Pool {
    /// Build a pool from raw URLs, dropping empty entries and duplicates.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let nodes = urls
            .into_iter()
            .map(Node::new)
            .filter(|node| !node.is_empty())
            .filter(|node| seen.insert(node.clone()))
            .collect();
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.contains(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Every node in the pool except `node`.
    pub fn excluding<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |candidate| *candidate != node)
    }
}

impl<'a> IntoIterator for &'a Pool {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slashes() {
        assert_eq!(Node::new("http://a:7000///").as_str(), "http://a:7000");
        assert_eq!(Node::new(" http://a:7000/ ").as_str(), "http://a:7000");
        assert_eq!(Node::new("http://a:7000").as_str(), "http://a:7000");
        assert!(Node::new("/").is_empty());
    }

    #[test]
    fn test_endpoint() {
        let node = Node::new("http://a:7000/");
        assert_eq!(
            node.endpoint("node/status/forging"),
            "http://a:7000/api/node/status/forging"
        );
        assert_eq!(node.endpoint("/node/status"), "http://a:7000/api/node/status");
    }

    #[test]
    fn test_pool_dedup() {
        let pool = Pool::new([
            "http://a:7000",
            "http://b:7000/",
            "http://a:7000/",
            "",
            "http://c:7000",
            "http://b:7000",
        ]);
        let nodes: Vec<_> = pool.iter().map(Node::as_str).collect();
        assert_eq!(nodes, vec!["http://a:7000", "http://b:7000", "http://c:7000"]);
    }

    #[test]
    fn test_pool_excluding() {
        let pool = Pool::new(["http://a", "http://b", "http://c"]);
        let active = Node::new("http://b/");
        let others: Vec<_> = pool.excluding(&active).map(Node::as_str).collect();
        assert_eq!(others, vec!["http://a", "http://c"]);
        assert!(pool.contains(&active));
    }

    #[test]
    fn test_serde_normalizes() {
        let node: Node = serde_json::from_str("\"http://a:7000//\"").unwrap();
        assert_eq!(node, Node::new("http://a:7000"));
        assert_eq!(serde_json::to_string(&node).unwrap(), "\"http://a:7000\"");
    }
}
