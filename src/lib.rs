//! Rust library that paints Philips Hue lights with the colors of the album
//! art that is currently playing.
//!
//! This library provides an async API for:
//!
//! - Bridge discovery via the Hue discovery directory
//! - Pairing through the link button, with token persistence and silent reconnect
//! - Listing the lights of a paired bridge
//! - Extracting a palette of dominant colors from album art
//! - Dispatching palette colors to lights with per-light acknowledgement
//!
//! # Quick Start
//!
//! ```no_run
//! use hue_ambience::{
//!     AlbumArt, BridgeConnector, BridgeDirectory, Config, FileBridgeStore, LightDispatcher,
//!     LightInventory, LightSync, PaletteExtractor, ReqwestTransport, TrackChange,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load();
//!     let transport = Arc::new(ReqwestTransport::with_timeout(config.request_timeout())?);
//!
//!     // Find a bridge and pair with it (press the link button)
//!     let bridges = BridgeDirectory::new(transport.clone()).discover().await?;
//!     let bridge = bridges.first().ok_or("no bridge found")?;
//!     let connector = BridgeConnector::new(
//!         transport.clone(),
//!         Arc::new(FileBridgeStore::open_default()?),
//!         config.device_type(),
//!     );
//!     let session = connector.pair(&bridge.address, Duration::from_secs(30)).await?;
//!
//!     // Paint the lights whenever the track changes
//!     let lights = LightInventory::new(transport.clone()).list_lights(&session);
//!     let sync = LightSync::new(
//!         transport.clone(),
//!         PaletteExtractor::new(config.palette),
//!         LightDispatcher::new(transport),
//!         lights,
//!         session,
//!     );
//!     if let Some(art) = AlbumArt::from_image_uri("spotify:image:ab67616d0000b273") {
//!         sync.on_track_changed(TrackChange::new("spotify:track:4uLU6hMCjMI75M1A2tKUQC", art));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Reconnecting
//!
//! A bridge that reached `Authorized` is persisted; at the next start it can
//! be revalidated without pressing the link button:
//!
//! ```no_run
//! use hue_ambience::{BridgeConnector, BridgeState, DeviceType, FileBridgeStore, ReqwestTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = BridgeConnector::new(
//!         Arc::new(ReqwestTransport::new()?),
//!         Arc::new(FileBridgeStore::open_default()?),
//!         DeviceType::for_this_host("hue_ambience"),
//!     );
//!     if let Some(status) = connector.resume() {
//!         status.register_observer(|state| println!("Bridge is {}", state));
//!         if status.wait().await == BridgeState::Authorized {
//!             println!("Reconnected to {}", connector.session().address);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Discovery**: directory lookup via `https://discovery.meethue.com`
//! - **Pairing**: link-button handshake and token validation per bridge
//! - **Inventory**: observable light groups
//! - **Palette**: k-means color extraction
//! - **Dispatcher**: concurrent light state commands
//! - **Sync**: track change → palette → lights
//! - **Transport**: HTTP seam shared by all of the above

mod config;
mod discovery;
mod dispatcher;
mod error;
mod inventory;
mod pairing;
mod palette;
mod protocol;
mod status;
mod store;
mod sync;
mod transport;
mod types;

#[cfg(test)]
mod test_support;

// Public exports
pub use config::{config_file_path, Config};
pub use discovery::{BridgeDirectory, Discovery, DISCOVERY_URL};
pub use dispatcher::{plan_commands, DispatchCycle, LightDispatcher, DEFAULT_MAX_IN_FLIGHT};
pub use error::{HueError, Result};
pub use inventory::{LightGroup, LightInventory};
pub use pairing::{BridgeConnector, BridgeSession, DeviceType};
pub use palette::{PaletteConfig, PaletteExtractor};
pub use protocol::{ApiError, BridgeErrorKind, HttpMethod};
pub use status::{BridgeState, BridgeStatusHandle};
pub use store::{default_store_path, BridgeStore, FileBridgeStore, MemoryBridgeStore, SavedBridge};
pub use sync::{AlbumArt, LightSync, TrackChange, IMAGE_PREFIX};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{
    classify_type, BridgeDescriptor, BridgeId, DesiredState, HueColor, Light, LightCommand,
    LightId, LightType, Palette, Rgb, Swatch,
};
