use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Pairing state of a bridge session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    AwaitingLinkButton,
    Authorized,
    Failed,
}

impl BridgeState {
    /// Whether an attempt in this state is finished
    ///
    /// `AwaitingLinkButton` is not terminal: it waits for a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Authorized | BridgeState::Failed)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Connecting => "connecting",
            BridgeState::AwaitingLinkButton => "awaiting link button",
            BridgeState::Authorized => "authorized",
            BridgeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

type Observer = Box<dyn Fn(BridgeState) + Send + Sync>;

struct StatusCell {
    state: BridgeState,
    observers: Vec<Observer>,
}

/// Observable result of one `connect`/`reconnect` call
///
/// Starts in [`BridgeState::Connecting`] and transitions exactly once more.
/// Observers run synchronously on the resolving task; an observer registered
/// after the transition runs immediately with the resolved state.
#[derive(Clone)]
pub struct BridgeStatusHandle {
    cell: Arc<Mutex<StatusCell>>,
    tx: Arc<watch::Sender<BridgeState>>,
}

impl BridgeStatusHandle {
    pub(crate) fn new() -> (Self, StatusResolver) {
        let (tx, _) = watch::channel(BridgeState::Connecting);
        let handle = Self {
            cell: Arc::new(Mutex::new(StatusCell {
                state: BridgeState::Connecting,
                observers: Vec::new(),
            })),
            tx: Arc::new(tx),
        };
        let resolver = StatusResolver {
            handle: handle.clone(),
            resolved: false,
        };
        (handle, resolver)
    }

    fn lock(&self) -> MutexGuard<'_, StatusCell> {
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state
    pub fn state(&self) -> BridgeState {
        self.lock().state
    }

    /// Whether the handle has left `Connecting`
    pub fn is_resolved(&self) -> bool {
        self.state() != BridgeState::Connecting
    }

    /// Register a callback for the transition out of `Connecting`
    pub fn register_observer<F>(&self, observer: F)
    where
        F: Fn(BridgeState) + Send + Sync + 'static,
    {
        let mut cell = self.lock();
        if cell.state == BridgeState::Connecting {
            cell.observers.push(Box::new(observer));
        } else {
            let state = cell.state;
            drop(cell);
            observer(state);
        }
    }

    /// Wait until the handle leaves `Connecting` and return the new state
    pub async fn wait(&self) -> BridgeState {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| *state != BridgeState::Connecting).await {
            Ok(state) => *state,
            // sender lives as long as self
            Err(_) => self.state(),
        };
        state
    }

    fn transition(&self, state: BridgeState) {
        let observers = {
            let mut cell = self.lock();
            if cell.state != BridgeState::Connecting {
                tracing::warn!("Ignoring second transition to {} (already {})", state, cell.state);
                return;
            }
            cell.state = state;
            std::mem::take(&mut cell.observers)
        };

        self.tx.send_replace(state);
        for observer in observers {
            observer(state);
        }
    }
}

impl fmt::Debug for BridgeStatusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeStatusHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Write side of a [`BridgeStatusHandle`]
///
/// Dropping an unresolved resolver resolves the handle to `Failed`, so a
/// worker that panics or is cancelled never leaves its handle hanging.
pub(crate) struct StatusResolver {
    handle: BridgeStatusHandle,
    resolved: bool,
}

impl StatusResolver {
    pub(crate) fn resolve(mut self, state: BridgeState) {
        self.resolved = true;
        self.handle.transition(state);
    }
}

impl Drop for StatusResolver {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::error!("Bridge status worker ended without a result");
            self.handle.transition(BridgeState::Failed);
        }
    }
}
