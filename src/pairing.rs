use crate::error::{HueError, Result};
use crate::protocol::{first_error, parse_pairing_reply, BridgeErrorKind, HttpMethod, PairingRequest};
use crate::status::{BridgeState, BridgeStatusHandle, StatusResolver};
use crate::store::{BridgeStore, SavedBridge};
use crate::transport::HttpTransport;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const APP_NAME_LIMIT: usize = 20;
const DEVICE_NAME_LIMIT: usize = 19;
const LINK_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Bridge address plus the pairing state and token
///
/// `access_token` is `Some` only while `state` is `Authorized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSession {
    pub address: String,
    pub access_token: Option<String>,
    pub state: BridgeState,
}

impl BridgeSession {
    /// Session with no bridge and no token
    pub fn disconnected() -> Self {
        Self {
            address: String::new(),
            access_token: None,
            state: BridgeState::Disconnected,
        }
    }

    /// Session for an already issued token
    pub fn authorized(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            access_token: Some(token.into()),
            state: BridgeState::Authorized,
        }
    }

    /// Whether the session holds a usable token
    pub fn is_authorized(&self) -> bool {
        self.state == BridgeState::Authorized && self.access_token.is_some()
    }

    /// `http://{address}/api/{token}` for an authorized session
    pub fn api_base(&self) -> Result<String> {
        match (&self.access_token, self.state) {
            (Some(token), BridgeState::Authorized) => {
                Ok(format!("http://{}/api/{}", self.address, token))
            }
            _ => Err(HueError::NotAuthorized),
        }
    }

    /// `http://{address}/api/{token}/lights`
    pub fn lights_url(&self) -> Result<String> {
        Ok(format!("{}/lights", self.api_base()?))
    }
}

impl Default for BridgeSession {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Identifier shown in the bridge's access list: `<app>#<device>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceType {
    app: String,
    device: String,
}

impl DeviceType {
    /// Truncates `app` to 20 and `device` to 19 characters
    pub fn new(app: impl AsRef<str>, device: impl AsRef<str>) -> Self {
        Self {
            app: app.as_ref().chars().take(APP_NAME_LIMIT).collect(),
            device: device.as_ref().chars().take(DEVICE_NAME_LIMIT).collect(),
        }
    }

    /// Use this machine's host name as the device part
    pub fn for_this_host(app: impl AsRef<str>) -> Self {
        let device = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(app, device)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.app, self.device)
    }
}

/// Result of one handshake, before it is applied to the session
#[derive(Debug)]
enum Handshake {
    Authorized(String),
    LinkPending,
    Failed(HueError),
}

#[derive(Default)]
struct SessionSlot {
    session: BridgeSession,
    attempt: u64,
}

/// Pairing state machine for one bridge at a time
///
/// `connect` and `reconnect` return immediately with a
/// [`BridgeStatusHandle`]; the handshake runs on a spawned task, so both must
/// be called from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use hue_ambience::{BridgeConnector, BridgeState, DeviceType, FileBridgeStore, ReqwestTransport};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let connector = BridgeConnector::new(
///         Arc::new(ReqwestTransport::new()?),
///         Arc::new(FileBridgeStore::open_default()?),
///         DeviceType::for_this_host("hue_ambience"),
///     );
///
///     let status = connector.connect("192.168.1.20");
///     if status.wait().await == BridgeState::AwaitingLinkButton {
///         println!("Press the link button, then connect again");
///     }
///     Ok(())
/// }
/// ```
pub struct BridgeConnector {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn BridgeStore>,
    device_type: DeviceType,
    slot: Arc<Mutex<SessionSlot>>,
}

impl BridgeConnector {
    /// Create a connector with no session; call `resume`, `connect` or `pair` next
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn BridgeStore>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            transport,
            store,
            device_type,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Snapshot of the current session
    pub fn session(&self) -> BridgeSession {
        self.lock().session.clone()
    }

    /// Current session if it is authorized
    pub fn authorized_session(&self) -> Option<BridgeSession> {
        let session = self.session();
        session.is_authorized().then_some(session)
    }

    /// Current session, or why it cannot be used yet
    ///
    /// Fails with [`HueError::AuthorizationPending`] while the bridge waits for
    /// its link button and [`HueError::NotAuthorized`] otherwise.
    pub fn require_session(&self) -> Result<BridgeSession> {
        let session = self.session();
        match session.state {
            _ if session.is_authorized() => Ok(session),
            BridgeState::AwaitingLinkButton => Err(HueError::AuthorizationPending),
            _ => Err(HueError::NotAuthorized),
        }
    }

    /// Current pairing state
    pub fn state(&self) -> BridgeState {
        self.lock().session.state
    }

    /// Identifier sent when pairing
    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    fn begin_attempt(&self, address: &str) -> u64 {
        let mut slot = self.lock();
        slot.attempt += 1;
        slot.session = BridgeSession {
            address: address.to_string(),
            access_token: None,
            state: BridgeState::Connecting,
        };
        slot.attempt
    }

    /// Request a new token from the bridge at `address`
    ///
    /// Resolves to `Authorized`, `AwaitingLinkButton` (press the button and
    /// call `connect` again) or `Failed`.
    pub fn connect(&self, address: &str) -> BridgeStatusHandle {
        self.start_pairing(address).0
    }

    fn start_pairing(&self, address: &str) -> (BridgeStatusHandle, JoinHandle<Result<BridgeState>>) {
        let attempt = self.begin_attempt(address);
        let (handle, resolver) = BridgeStatusHandle::new();
        tracing::info!("Pairing with bridge at {} as {}", address, self.device_type);

        let worker = self.worker(address, attempt);
        let body = serde_json::to_value(PairingRequest {
            devicetype: self.device_type.to_string(),
        });

        let task = tokio::spawn(async move {
            let outcome = match body {
                Ok(body) => request_token(worker.transport.as_ref(), &worker.address, body).await,
                Err(e) => Handshake::Failed(e.into()),
            };
            worker.finish(outcome, resolver)
        });

        (handle, task)
    }

    /// Validate a previously issued token without pairing again
    pub fn reconnect(&self, address: &str, token: &str) -> BridgeStatusHandle {
        let attempt = self.begin_attempt(address);
        let (handle, resolver) = BridgeStatusHandle::new();
        tracing::info!("Reconnecting to bridge at {}", address);

        let worker = self.worker(address, attempt);
        let token = token.to_string();

        tokio::spawn(async move {
            let outcome = validate_token(worker.transport.as_ref(), &worker.address, token).await;
            // the cause is logged and the handle carries the state
            let _ = worker.finish(outcome, resolver);
        });

        handle
    }

    /// Reconnect to the persisted bridge, if there is one
    pub fn resume(&self) -> Option<BridgeStatusHandle> {
        match self.store.load() {
            Ok(Some(saved)) => Some(self.reconnect(&saved.address, &saved.token)),
            Ok(None) => {
                tracing::info!("No saved bridge to resume");
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read saved bridge: {}", e);
                None
            }
        }
    }

    /// Pair, retrying while the bridge waits for its link button
    ///
    /// Gives up with [`HueError::AuthorizationDenied`] once `window` has passed.
    /// Any other failure is returned as the error that caused it.
    pub async fn pair(&self, address: &str, window: Duration) -> Result<BridgeSession> {
        let deadline = Instant::now() + window;
        loop {
            let (_, task) = self.start_pairing(address);
            let state = match task.await {
                Ok(outcome) => outcome?,
                Err(e) => {
                    return Err(HueError::Protocol(format!("Pairing task for {} ended: {}", address, e)));
                }
            };

            match state {
                BridgeState::Authorized => {
                    return self.authorized_session().ok_or(HueError::NotAuthorized);
                }
                BridgeState::AwaitingLinkButton => {
                    if Instant::now() + LINK_RETRY_INTERVAL > deadline {
                        tracing::warn!("Link button was not pressed within {:?}", window);
                        return Err(HueError::AuthorizationDenied);
                    }
                    tracing::info!("Waiting for the link button on {}", address);
                    sleep(LINK_RETRY_INTERVAL).await;
                }
                state => {
                    return Err(HueError::Protocol(format!("Pairing with {} ended {}", address, state)));
                }
            }
        }
    }

    /// Abandon the bridge: clear the persisted token and reset the session
    pub fn forget(&self) -> Result<()> {
        {
            let mut slot = self.lock();
            slot.attempt += 1;
            slot.session = BridgeSession::disconnected();
        }
        self.store.clear()
    }

    fn worker(&self, address: &str, attempt: u64) -> Worker {
        Worker {
            transport: self.transport.clone(),
            store: self.store.clone(),
            slot: self.slot.clone(),
            address: address.to_string(),
            attempt,
        }
    }
}

/// State a spawned handshake needs once the caller has returned
struct Worker {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn BridgeStore>,
    slot: Arc<Mutex<SessionSlot>>,
    address: String,
    attempt: u64,
}

impl Worker {
    /// Apply the outcome and resolve the handle; failures keep their cause
    fn finish(self, outcome: Handshake, resolver: StatusResolver) -> Result<BridgeState> {
        let (state, token, error) = match outcome {
            Handshake::Authorized(token) => (BridgeState::Authorized, Some(token), None),
            Handshake::LinkPending => {
                tracing::info!("Bridge at {} is waiting for its link button", self.address);
                (BridgeState::AwaitingLinkButton, None, None)
            }
            Handshake::Failed(e) => {
                tracing::error!("Connection to bridge at {} failed: {}", self.address, e);
                (BridgeState::Failed, None, Some(e))
            }
        };

        let current = {
            let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
            let current = slot.attempt == self.attempt;
            if current {
                slot.session = BridgeSession {
                    address: self.address.clone(),
                    access_token: token.clone(),
                    state,
                };
            } else {
                tracing::debug!("Discarding result of superseded attempt to {}", self.address);
            }
            current
        };

        if current {
            if let Some(token) = token {
                tracing::info!("Authorized with bridge at {}", self.address);
                let saved = SavedBridge {
                    address: self.address.clone(),
                    token,
                };
                if let Err(e) = self.store.save(&saved) {
                    tracing::error!("Failed to persist bridge {}: {}", self.address, e);
                }
            }
        }

        resolver.resolve(state);
        match error {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }
}

async fn request_token(transport: &dyn HttpTransport, address: &str, body: Value) -> Handshake {
    let url = format!("http://{}/api", address);
    let reply = match transport.send_json(HttpMethod::Post, &url, Some(body)).await {
        Ok(reply) => reply,
        Err(e) => return Handshake::Failed(e),
    };

    match parse_pairing_reply(&reply) {
        Ok(token) => Handshake::Authorized(token),
        Err(e) if e.is_link_pending() => Handshake::LinkPending,
        Err(e) => Handshake::Failed(e),
    }
}

async fn validate_token(transport: &dyn HttpTransport, address: &str, token: String) -> Handshake {
    let url = format!("http://{}/api/{}/lights", address, token);
    let reply = match transport.send_json(HttpMethod::Get, &url, None).await {
        Ok(reply) => reply,
        Err(e) => return Handshake::Failed(e),
    };

    if reply.is_object() {
        return Handshake::Authorized(token);
    }

    match first_error(&reply) {
        Some(error) if BridgeErrorKind::from_code(error.error_type) == BridgeErrorKind::UnauthorizedUser => {
            tracing::warn!("Saved token was rejected by bridge at {}", address);
            Handshake::Failed(HueError::AuthorizationDenied)
        }
        Some(error) => Handshake::Failed(error.into()),
        None => Handshake::Failed(HueError::Protocol(format!(
            "Unexpected reply while validating token: {}",
            reply
        ))),
    }
}
