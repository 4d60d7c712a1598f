//! Federation node discovery.

use crate::client::StoreClient;
use crate::config::{FederationConfig, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::http::{HttpClient, HttpStore, UreqClient};
use crate::memory::MemoryStore;
use crate::record::fields;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A remote store endpoint, identified by its host name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FederationNode {
    /// Host name as reported by the registry.
    pub name: String,
}

impl FederationNode {
    /// Creates a node.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for FederationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Discovers federation members and connects to them.
///
/// Discovery is performed on every call; results are never cached.
pub trait Federation: Send + Sync {
    /// Lists the current federation members.
    fn discover(&self) -> StoreResult<Vec<FederationNode>>;

    /// Opens a client for one member.
    fn connect(&self, node: &FederationNode) -> StoreResult<Arc<dyn StoreClient>>;
}

impl<C: HttpClient> HttpClient for Arc<C> {
    fn get(&self, url: &str, params: &[(String, String)]) -> StoreResult<String> {
        (**self).get(url, params)
    }

    fn post(
        &self,
        url: &str,
        params: &[(String, String)],
        content_type: &str,
        body: Vec<u8>,
    ) -> StoreResult<String> {
        (**self).post(url, params, content_type, body)
    }
}

/// Federation discovered through a registry's facet enumeration.
pub struct HttpFederation<C: HttpClient = UreqClient> {
    config: FederationConfig,
    client: Arc<C>,
}

impl HttpFederation<UreqClient> {
    /// Creates a federation using the production HTTP client.
    pub fn new(config: FederationConfig) -> Self {
        let client = UreqClient::new(config.store.timeout);
        Self::with_client(config, client)
    }
}

impl<C: HttpClient + 'static> HttpFederation<C> {
    /// Creates a federation with a custom HTTP client.
    pub fn with_client(config: FederationConfig, client: C) -> Self {
        Self {
            config,
            client: Arc::new(client),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }
}

impl<C: HttpClient + 'static> Federation for HttpFederation<C> {
    fn discover(&self) -> StoreResult<Vec<FederationNode>> {
        let url = format!("{}/", self.config.registry_url);
        let params: Vec<(String, String)> = [
            ("offset", "0"),
            ("limit", "0"),
            ("type", "Dataset"),
            ("facets", fields::INDEX_NODE),
            ("format", "application/solr+json"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let body = self
            .config
            .store
            .retry
            .run(&self.config.registry_url, "discovery", || {
                self.client.get(&url, &params)
            })?;
        let names = parse_facet_names(&body, fields::INDEX_NODE)?;
        let nodes: Vec<FederationNode> = names
            .into_iter()
            .filter(|name| {
                let excluded = self.config.exclude_nodes.iter().any(|ex| ex == name);
                if excluded {
                    debug!(node = %name, "excluding node");
                }
                !excluded
            })
            .map(FederationNode::new)
            .collect();
        info!(registry = %self.config.registry_url, nodes = nodes.len(), "discovered federation");
        Ok(nodes)
    }

    fn connect(&self, node: &FederationNode) -> StoreResult<Arc<dyn StoreClient>> {
        let store = &self.config.store;
        let config = StoreConfig::new(self.config.node_url(&node.name))?
            .with_timeout(store.timeout)
            .with_retry(store.retry.clone())
            .with_timestamp_field(store.timestamp_field.clone());
        Ok(Arc::new(HttpStore::with_client(
            config,
            Arc::clone(&self.client),
        )))
    }
}

/// Extracts facet values from a `facet_counts.facet_fields.<field>` list of
/// alternating names and counts.
pub fn parse_facet_names(body: &str, field: &str) -> StoreResult<Vec<String>> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("registry response: {e}")))?;
    let values = json
        .pointer(&format!("/facet_counts/facet_fields/{field}"))
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Decode(format!("registry response has no {field} facet")))?;
    Ok(values
        .iter()
        .step_by(2)
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

/// Static federation of in-memory stores.
#[derive(Default)]
pub struct MemoryFederation {
    nodes: RwLock<Vec<(FederationNode, Arc<MemoryStore>)>>,
    discovery_fails: AtomicBool,
}

impl MemoryFederation {
    /// Creates an empty federation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member backed by `store`.
    pub fn add_node(&self, name: impl Into<String>, store: Arc<MemoryStore>) {
        self.nodes.write().push((FederationNode::new(name), store));
    }

    /// Makes discovery fail.
    pub fn set_discovery_failure(&self, fail: bool) {
        self.discovery_fails.store(fail, Ordering::SeqCst);
    }
}

impl Federation for MemoryFederation {
    fn discover(&self) -> StoreResult<Vec<FederationNode>> {
        if self.discovery_fails.load(Ordering::SeqCst) {
            return Err(StoreError::transport_retryable("registry", "connection refused"));
        }
        Ok(self.nodes.read().iter().map(|(n, _)| n.clone()).collect())
    }

    fn connect(&self, node: &FederationNode) -> StoreResult<Arc<dyn StoreClient>> {
        self.nodes
            .read()
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, store)| Arc::clone(store) as Arc<dyn StoreClient>)
            .ok_or_else(|| StoreError::InvalidEndpoint(format!("unknown node {node}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct RegistryClient {
        body: String,
        failures: Mutex<u32>,
        urls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl HttpClient for RegistryClient {
        fn get(&self, url: &str, params: &[(String, String)]) -> StoreResult<String> {
            self.urls.lock().push((url.to_string(), params.to_vec()));
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::transport_retryable(url, "connection reset"));
            }
            Ok(self.body.clone())
        }

        fn post(&self, url: &str, _: &[(String, String)], _: &str, _: Vec<u8>) -> StoreResult<String> {
            Err(StoreError::transport_fatal(url, "unexpected post"))
        }
    }

    fn federation(body: &str) -> HttpFederation<RegistryClient> {
        flaky_federation(body, 0)
    }

    fn flaky_federation(body: &str, failures: u32) -> HttpFederation<RegistryClient> {
        let store = StoreConfig::new("https://esgf-node.example.org/solr")
            .unwrap()
            .with_retry(RetryConfig::new(3).with_pause(Duration::ZERO));
        let config = FederationConfig::new("https://registry.example.org/esg-search/search", store)
            .unwrap()
            .exclude_node("esgf-node.example.org");
        HttpFederation::with_client(
            config,
            RegistryClient {
                body: body.to_string(),
                failures: Mutex::new(failures),
                urls: Mutex::new(Vec::new()),
            },
        )
    }

    #[test]
    fn discovers_even_facet_entries() {
        let fed = federation(
            r#"{"facet_counts":{"facet_fields":{"index_node":
                ["esgf-data.dkrz.de",120,"esgf-node.example.org",7,"esgf.nci.org.au",3]}}}"#,
        );
        let nodes = fed.discover().unwrap();
        assert_eq!(
            nodes,
            vec![
                FederationNode::new("esgf-data.dkrz.de"),
                FederationNode::new("esgf.nci.org.au")
            ]
        );

        let calls = fed.client.urls.lock().clone();
        assert_eq!(calls[0].0, "https://registry.example.org/esg-search/search/");
        assert!(calls[0]
            .1
            .contains(&("facets".to_string(), "index_node".to_string())));
        assert!(calls[0].1.contains(&("limit".to_string(), "0".to_string())));
    }

    #[test]
    fn discovery_retries_transient_registry_errors() {
        let body = r#"{"facet_counts":{"facet_fields":{"index_node":["esgf.nci.org.au",3]}}}"#;
        let fed = flaky_federation(body, 1);
        let nodes = fed.discover().unwrap();
        assert_eq!(nodes, vec![FederationNode::new("esgf.nci.org.au")]);
        assert_eq!(fed.client.urls.lock().len(), 2);

        let fed = flaky_federation(body, 3);
        assert!(fed.discover().is_err());
        assert_eq!(fed.client.urls.lock().len(), 3);
    }

    #[test]
    fn blank_facet_names_are_dropped() {
        let body = r#"{"facet_counts":{"facet_fields":{"index_node":["",4," esgf.nci.org.au ",3]}}}"#;
        assert_eq!(
            parse_facet_names(body, "index_node").unwrap(),
            vec!["esgf.nci.org.au".to_string()]
        );
    }

    #[test]
    fn missing_facet_is_a_decode_error() {
        let fed = federation(r#"{"response":{"numFound":0}}"#);
        assert!(matches!(fed.discover(), Err(StoreError::Decode(_))));
    }

    #[test]
    fn connect_uses_node_template() {
        let fed = federation("{}");
        let client = fed.connect(&FederationNode::new("esgf-data.dkrz.de")).unwrap();
        assert_eq!(client.endpoint(), "https://esgf-data.dkrz.de/solr");
    }

    #[test]
    fn memory_federation() {
        let fed = MemoryFederation::new();
        fed.add_node("a", Arc::new(MemoryStore::new("a")));
        let nodes = fed.discover().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(fed.connect(&nodes[0]).unwrap().endpoint(), "a");
        assert!(fed.connect(&FederationNode::new("b")).is_err());

        fed.set_discovery_failure(true);
        assert!(fed.discover().is_err());
    }
}
