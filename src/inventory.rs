use crate::error::{HueError, Result};
use crate::pairing::BridgeSession;
use crate::protocol::{first_error, HttpMethod};
use crate::transport::HttpTransport;
use crate::types::{Light, LightType};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type Observer = Arc<dyn Fn(&[Light]) + Send + Sync>;

/// Observable set of lights with unique ids
///
/// Readers get immutable snapshots; [`replace_all`](Self::replace_all) swaps
/// the whole set at once, so a reader never sees a half-applied update.
#[derive(Clone)]
pub struct LightGroup {
    tx: Arc<watch::Sender<Arc<Vec<Light>>>>,
    observers: Arc<Mutex<Vec<Observer>>>,
}

impl LightGroup {
    /// Empty group
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            tx: Arc::new(tx),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Group initialised with `lights` (duplicates dropped)
    pub fn with_lights(lights: Vec<Light>) -> Self {
        let group = Self::new();
        group.replace_all(lights);
        group
    }

    /// Current lights
    pub fn snapshot(&self) -> Arc<Vec<Light>> {
        self.tx.borrow().clone()
    }

    /// Number of lights
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    /// Whether the group has no lights
    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Light with the given id
    pub fn get(&self, id: &str) -> Option<Light> {
        self.tx.borrow().iter().find(|l| l.id == id).cloned()
    }

    /// Replace every light; the first light wins when ids repeat
    pub fn replace_all(&self, lights: Vec<Light>) -> usize {
        let mut seen = HashSet::with_capacity(lights.len());
        let mut unique = Vec::with_capacity(lights.len());
        for light in lights {
            if seen.insert(light.id.clone()) {
                unique.push(light);
            } else {
                tracing::warn!("Dropping duplicate light id {}", light.id);
            }
        }

        let snapshot = Arc::new(unique);
        let count = snapshot.len();
        self.tx.send_replace(snapshot.clone());

        // observers may touch the group, so call them unlocked
        let observers = self.observers.lock().unwrap_or_else(|p| p.into_inner()).clone();
        for observer in observers.iter() {
            observer(snapshot.as_slice());
        }
        count
    }

    /// Call `observer` after every replace
    pub fn register_observer<F>(&self, observer: F)
    where
        F: Fn(&[Light]) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Arc::new(observer));
    }

    /// Receiver that wakes on every replace
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Light>>> {
        self.tx.subscribe()
    }
}

impl Default for LightGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LightGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot().iter()).finish()
    }
}

/// Enumerates the lights of a paired bridge
#[derive(Clone)]
pub struct LightInventory {
    transport: Arc<dyn HttpTransport>,
}

impl LightInventory {
    /// Create an inventory that lists lights over `transport`
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Start listing lights and return the group they will land in
    ///
    /// The group is empty until the bridge answers. Failures are logged and
    /// leave the group empty.
    pub fn list_lights(&self, session: &BridgeSession) -> LightGroup {
        let group = LightGroup::new();
        self.refresh(session, &group);
        group
    }

    /// Re-list lights into an existing group
    pub fn refresh(&self, session: &BridgeSession, group: &LightGroup) -> tokio::task::JoinHandle<()> {
        let inventory = self.clone();
        let session = session.clone();
        let group = group.clone();

        tokio::spawn(async move {
            match inventory.fetch_lights(&session).await {
                Ok(lights) => {
                    let count = group.replace_all(lights);
                    tracing::info!("Bridge at {} has {} light(s)", session.address, count);
                }
                Err(e) => {
                    tracing::warn!("Failed to list lights on {}: {}", session.address, e);
                }
            }
        })
    }

    /// Fetch and parse the light list
    pub async fn fetch_lights(&self, session: &BridgeSession) -> Result<Vec<Light>> {
        let url = session.lights_url()?;
        let reply = self.transport.send_json(HttpMethod::Get, &url, None).await?;
        parse_lights(&reply)
    }
}

fn parse_lights(reply: &Value) -> Result<Vec<Light>> {
    if let Some(error) = first_error(reply) {
        return Err(error.into());
    }
    let entries = reply
        .as_object()
        .ok_or_else(|| HueError::Protocol("Light list is not an object".to_string()))?;

    let mut lights = Vec::with_capacity(entries.len());
    for (id, attributes) in entries {
        let name = attributes.get("name").and_then(|v| v.as_str());
        let raw_type = attributes.get("type").and_then(|v| v.as_str());

        match (name, raw_type) {
            (Some(name), Some(raw_type)) => {
                let light_type = LightType::classify(raw_type);
                tracing::debug!("Light {} '{}' is {:?} ({})", id, name, light_type, raw_type);
                lights.push(Light::new(id.clone(), name, light_type));
            }
            _ => {
                tracing::warn!("Skipping malformed light {}: {}", id, attributes);
            }
        }
    }

    // bridge ids are decimal strings; keep "10" after "9"
    lights.sort_by(|a, b| {
        match (a.id.parse::<u64>(), b.id.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.id.cmp(&b.id),
        }
    });
    Ok(lights)
}
