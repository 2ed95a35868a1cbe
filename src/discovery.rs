use crate::config::Config;
use crate::error::{HueError, Result};
use crate::protocol::{DirectoryEntry, HttpMethod};
use crate::transport::HttpTransport;
use crate::types::{BridgeDescriptor, BridgeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

pub const DISCOVERY_URL: &str = "https://discovery.meethue.com";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Client for the bridge discovery directory
///
/// Each [`discover`](Self::discover) call performs exactly one lookup and
/// returns the complete result; caching is up to the caller (see [`Discovery`]).
#[derive(Clone)]
pub struct BridgeDirectory {
    transport: Arc<dyn HttpTransport>,
    url: String,
}

impl BridgeDirectory {
    /// Client for the public discovery directory
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_url(transport, DISCOVERY_URL)
    }

    /// Use a different directory endpoint
    pub fn with_url(transport: Arc<dyn HttpTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    /// Look up the bridges visible from this network
    ///
    /// An empty list is a valid answer meaning no bridge is visible.
    pub async fn discover(&self) -> Result<Vec<BridgeDescriptor>> {
        tracing::info!("Querying bridge directory: {}", self.url);
        let value = self.transport.send_json(HttpMethod::Get, &self.url, None).await?;
        let bridges = parse_directory(&value)?;
        tracing::info!("Directory reported {} bridge(s)", bridges.len());
        Ok(bridges)
    }
}

fn parse_directory(value: &serde_json::Value) -> Result<Vec<BridgeDescriptor>> {
    let entries = value
        .as_array()
        .ok_or_else(|| HueError::Protocol("Discovery response is not an array".to_string()))?;

    let mut bridges = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<DirectoryEntry>(entry.clone()) {
            Ok(entry) => {
                tracing::debug!("Found bridge {} at {}", entry.id, entry.internal_ip_address);
                bridges.push(BridgeDescriptor {
                    id: entry.id,
                    address: entry.internal_ip_address,
                });
            }
            Err(e) => {
                tracing::warn!("Skipping malformed directory entry {}: {}", entry, e);
            }
        }
    }
    Ok(bridges)
}

/// Merge a discovery result into the cache, returning ids that are new or moved
fn merge_bridges(
    cache: &mut BTreeMap<BridgeId, BridgeDescriptor>,
    found: Vec<BridgeDescriptor>,
) -> Vec<BridgeId> {
    let mut changed = Vec::new();
    for bridge in found {
        match cache.get(&bridge.id) {
            Some(existing) if existing.address == bridge.address => {}
            Some(existing) => {
                tracing::info!(
                    "Bridge {} moved from {} to {}",
                    bridge.id,
                    existing.address,
                    bridge.address
                );
                changed.push(bridge.id.clone());
                cache.insert(bridge.id.clone(), bridge);
            }
            None => {
                tracing::info!("New bridge {} at {}", bridge.id, bridge.address);
                changed.push(bridge.id.clone());
                cache.insert(bridge.id.clone(), bridge);
            }
        }
    }
    changed
}

/// Background discovery with a cache keyed by bridge id
///
/// Polls the directory on an interval and keeps the last known address of
/// every bridge it has seen. Failed lookups are retried with exponential
/// backoff.
///
/// # Example
///
/// ```no_run
/// use hue_ambience::{BridgeDirectory, Discovery, ReqwestTransport};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let directory = BridgeDirectory::new(Arc::new(ReqwestTransport::new()?));
///     let mut discovery = Discovery::new(directory);
///     let mut updates = discovery.subscribe_updates();
///     discovery.start();
///
///     let id = updates.recv().await?;
///     println!("Bridge {} at {:?}", id, discovery.address_of(&id));
///
///     discovery.stop().await;
///     Ok(())
/// }
/// ```
pub struct Discovery {
    directory: BridgeDirectory,
    interval: Duration,
    bridges: Arc<Mutex<BTreeMap<BridgeId, BridgeDescriptor>>>,
    update_tx: Arc<broadcast::Sender<BridgeId>>,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Discovery {
    /// Create a new Discovery manager polling every 30 seconds
    pub fn new(directory: BridgeDirectory) -> Self {
        let (update_tx, _) = broadcast::channel(100);
        Self {
            directory,
            interval: DEFAULT_INTERVAL,
            bridges: Arc::new(Mutex::new(BTreeMap::new())),
            update_tx: Arc::new(update_tx),
            stop_tx: None,
            task_handle: None,
        }
    }

    /// Set the polling interval used after a successful lookup
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Discovery manager using the configured directory and polling interval
    pub fn from_config(transport: Arc<dyn HttpTransport>, config: &Config) -> Self {
        let directory = BridgeDirectory::with_url(transport, config.discovery_url.clone());
        Self::new(directory).with_interval(config.discovery_interval())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<BridgeId, BridgeDescriptor>> {
        self.bridges.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Subscribe to ids of bridges that appeared or changed address
    pub fn subscribe_updates(&self) -> broadcast::Receiver<BridgeId> {
        self.update_tx.subscribe()
    }

    /// Snapshot of the known bridges
    pub fn bridges(&self) -> Vec<BridgeDescriptor> {
        self.lock().values().cloned().collect()
    }

    /// Get the number of discovered bridges
    pub fn bridge_count(&self) -> usize {
        self.lock().len()
    }

    /// Last known address of a bridge
    pub fn address_of(&self, id: &str) -> Option<String> {
        self.lock().get(id).map(|b| b.address.clone())
    }

    /// Forget every cached bridge
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Run one lookup now and merge it into the cache
    pub async fn refresh(&self) -> Result<usize> {
        refresh_once(&self.directory, &self.bridges, &self.update_tx).await
    }

    /// Start polling in the background
    ///
    /// A running poller is restarted; the cache is preserved.
    pub fn start(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }

        let (stop_tx, _) = broadcast::channel(1);
        self.stop_tx = Some(stop_tx.clone());

        let directory = self.directory.clone();
        let bridges = self.bridges.clone();
        let update_tx = self.update_tx.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut delay = Duration::from_secs(0);
            let mut backoff = Duration::from_secs(0);
            let mut stop_rx = stop_tx.subscribe();

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Discovery stopped");
                        break;
                    }
                    _ = async {
                        if delay > Duration::from_secs(0) {
                            sleep(delay).await;
                        }

                        match refresh_once(&directory, &bridges, &update_tx).await {
                            Ok(_) => {
                                backoff = Duration::from_secs(0);
                                delay = interval;
                            }
                            Err(e) => {
                                tracing::error!("Discovery error: {}", e);
                                // 1s, 2s, 4s, ... up to MAX_BACKOFF
                                backoff = if backoff == Duration::from_secs(0) {
                                    Duration::from_secs(1)
                                } else {
                                    (backoff * 2).min(MAX_BACKOFF)
                                };
                                tracing::info!("Retrying discovery in {:?}", backoff);
                                delay = backoff;
                            }
                        }
                    } => {}
                }
            }
        });

        self.task_handle = Some(handle);
    }

    /// Stop polling; the cache stays readable
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
    }
}

async fn refresh_once(
    directory: &BridgeDirectory,
    bridges: &Arc<Mutex<BTreeMap<BridgeId, BridgeDescriptor>>>,
    update_tx: &broadcast::Sender<BridgeId>,
) -> Result<usize> {
    let found = directory.discover().await?;
    let count = found.len();
    let changed = {
        let mut cache = bridges.lock().unwrap_or_else(|p| p.into_inner());
        merge_bridges(&mut cache, found)
    };
    for id in changed {
        let _ = update_tx.send(id);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use serde_json::json;

    fn descriptor(id: &str, address: &str) -> BridgeDescriptor {
        BridgeDescriptor {
            id: id.to_string(),
            address: address.to_string(),
        }
    }

    #[tokio::test]
    async fn discover_parses_directory() {
        let transport = FakeTransport::new();
        transport.reply(
            HttpMethod::Get,
            DISCOVERY_URL,
            json!([
                {"id": "001788fffe100491", "internalipaddress": "192.168.2.23"},
                {"id": "001788fffe09dddb", "internalipaddress": "192.168.88.252", "port": 443}
            ]),
        );

        let directory = BridgeDirectory::new(transport.clone());
        let bridges = directory.discover().await.unwrap();
        assert_eq!(
            bridges,
            vec![
                descriptor("001788fffe100491", "192.168.2.23"),
                descriptor("001788fffe09dddb", "192.168.88.252"),
            ]
        );
        assert_eq!(transport.count(HttpMethod::Get), 1);
    }

    #[tokio::test]
    async fn empty_directory_is_not_an_error() {
        let transport = FakeTransport::new();
        transport.reply(HttpMethod::Get, DISCOVERY_URL, json!([]));
        let bridges = BridgeDirectory::new(transport).discover().await.unwrap();
        assert!(bridges.is_empty());
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let transport = FakeTransport::new();
        transport.reply(
            HttpMethod::Get,
            DISCOVERY_URL,
            json!([{"id": "a"}, {"id": "b", "internalipaddress": "10.0.0.2"}, 42]),
        );
        let bridges = BridgeDirectory::new(transport).discover().await.unwrap();
        assert_eq!(bridges, vec![descriptor("b", "10.0.0.2")]);
    }

    #[tokio::test]
    async fn non_array_reply_is_protocol_error() {
        let transport = FakeTransport::new();
        transport.reply(HttpMethod::Get, DISCOVERY_URL, json!({"error": "rate limited"}));
        let result = BridgeDirectory::new(transport).discover().await;
        assert!(matches!(result, Err(HueError::Protocol(_))));
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let transport = FakeTransport::new();
        transport.fail(HttpMethod::Get, DISCOVERY_URL);
        let result = BridgeDirectory::new(transport).discover().await;
        assert!(matches!(result, Err(HueError::Timeout)));
    }

    #[test]
    fn merge_reports_new_and_moved_bridges() {
        let mut cache = BTreeMap::new();
        let changed = merge_bridges(&mut cache, vec![descriptor("a", "10.0.0.1")]);
        assert_eq!(changed, vec!["a".to_string()]);

        let changed = merge_bridges(&mut cache, vec![descriptor("a", "10.0.0.1")]);
        assert!(changed.is_empty());

        let changed = merge_bridges(&mut cache, vec![descriptor("a", "10.0.0.9")]);
        assert_eq!(changed, vec!["a".to_string()]);
        assert_eq!(cache["a"].address, "10.0.0.9");
    }

    #[tokio::test]
    async fn refresh_updates_cache_and_notifies() {
        let transport = FakeTransport::new();
        transport.reply(
            HttpMethod::Get,
            DISCOVERY_URL,
            json!([{"id": "a", "internalipaddress": "10.0.0.1"}]),
        );
        transport.reply(
            HttpMethod::Get,
            DISCOVERY_URL,
            json!([{"id": "a", "internalipaddress": "10.0.0.7"}]),
        );

        let discovery = Discovery::new(BridgeDirectory::new(transport));
        let mut updates = discovery.subscribe_updates();

        assert_eq!(discovery.refresh().await.unwrap(), 1);
        assert_eq!(updates.recv().await.unwrap(), "a");
        assert_eq!(discovery.address_of("a").as_deref(), Some("10.0.0.1"));

        discovery.refresh().await.unwrap();
        assert_eq!(updates.recv().await.unwrap(), "a");
        assert_eq!(discovery.address_of("a").as_deref(), Some("10.0.0.7"));
        assert_eq!(discovery.bridge_count(), 1);
    }

    #[tokio::test]
    async fn background_poller_fills_cache() {
        let transport = FakeTransport::new();
        transport.reply(
            HttpMethod::Get,
            DISCOVERY_URL,
            json!([{"id": "a", "internalipaddress": "10.0.0.1"}]),
        );

        let mut discovery =
            Discovery::new(BridgeDirectory::new(transport)).with_interval(Duration::from_secs(3600));
        let mut updates = discovery.subscribe_updates();
        discovery.start();

        assert_eq!(updates.recv().await.unwrap(), "a");
        assert_eq!(discovery.bridges(), vec![descriptor("a", "10.0.0.1")]);
        discovery.stop().await;
    }

    #[tokio::test]
    async fn config_sets_directory_and_interval() {
        let transport = FakeTransport::new();
        transport.reply(
            HttpMethod::Get,
            "http://directory.local/bridges",
            json!([{"id": "b", "internalipaddress": "10.0.0.9"}]),
        );
        let config = Config {
            discovery_url: "http://directory.local/bridges".to_string(),
            discovery_interval_secs: 5,
            ..Config::default()
        };

        let discovery = Discovery::from_config(transport.clone(), &config);
        assert_eq!(discovery.interval, Duration::from_secs(5));

        discovery.refresh().await.unwrap();
        assert_eq!(discovery.address_of("b").as_deref(), Some("10.0.0.9"));
        assert_eq!(transport.requests()[0].url, "http://directory.local/bridges");
    }
}
