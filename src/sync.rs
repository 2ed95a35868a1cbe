use crate::dispatcher::LightDispatcher;
use crate::error::{HueError, Result};
use crate::inventory::LightGroup;
use crate::pairing::BridgeSession;
use crate::palette::PaletteExtractor;
use crate::transport::HttpTransport;
use crate::types::Palette;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Where album-art images for `spotify:image:<code>` references live
pub const IMAGE_PREFIX: &str = "https://i.scdn.co/image/";

/// Album art of a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumArt {
    /// Image to download
    Url(String),
    /// Already downloaded image
    Bytes(Vec<u8>),
}

impl AlbumArt {
    /// Resolve an image reference such as `spotify:image:ab67616d0000b273...`
    pub fn from_image_uri(uri: &str) -> Option<Self> {
        let code = uri.rsplit(':').next()?.split('\'').next()?.trim();
        if code.is_empty() {
            return None;
        }
        Some(AlbumArt::Url(format!("{}{}", IMAGE_PREFIX, code)))
    }
}

/// Notification from the playback source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackChange {
    /// Track identifier, used to ignore repeated notifications for one track
    pub track_uri: Option<String>,
    pub art: AlbumArt,
}

impl TrackChange {
    /// Change to `track_uri` with its album art
    pub fn new(track_uri: impl Into<String>, art: AlbumArt) -> Self {
        Self {
            track_uri: Some(track_uri.into()),
            art,
        }
    }
}

struct SyncInner {
    transport: Arc<dyn HttpTransport>,
    extractor: PaletteExtractor,
    dispatcher: LightDispatcher,
    lights: LightGroup,
    session: BridgeSession,
    last_track: Mutex<Option<String>>,
}

/// Keeps lights in step with the album art of the playing track
///
/// Every track change is handled on its own task, so a slow download or
/// bridge never delays the next one.
#[derive(Clone)]
pub struct LightSync {
    inner: Arc<SyncInner>,
}

impl LightSync {
    /// Paint `lights` on the bridge of `session`
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        extractor: PaletteExtractor,
        dispatcher: LightDispatcher,
        lights: LightGroup,
        session: BridgeSession,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                transport,
                extractor,
                dispatcher,
                lights,
                session,
                last_track: Mutex::new(None),
            }),
        }
    }

    /// Lights being painted
    pub fn lights(&self) -> &LightGroup {
        &self.inner.lights
    }

    /// Dispatcher sending the light commands
    pub fn dispatcher(&self) -> &LightDispatcher {
        &self.inner.dispatcher
    }

    /// Handle a track change in the background
    ///
    /// Returns `None` if the change repeats the previous track. A track whose
    /// sync fails is forgotten, so the next notification for it tries again.
    pub fn on_track_changed(&self, change: TrackChange) -> Option<JoinHandle<()>> {
        if !self.is_new_track(&change) {
            tracing::debug!("Ignoring repeated notification for {:?}", change.track_uri);
            return None;
        }

        let sync = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = sync.apply(change.art).await {
                tracing::warn!("Light sync incomplete: {}", e);
                if let Some(uri) = &change.track_uri {
                    sync.forget_track(uri);
                }
            }
        }))
    }

    /// Consume track changes until the sender is dropped
    pub async fn run(self, mut events: mpsc::Receiver<TrackChange>) {
        tracing::info!("Light sync started");
        while let Some(change) = events.recv().await {
            self.on_track_changed(change);
        }
        tracing::info!("Playback events closed, light sync stopped");
    }

    /// Extract the palette of `art` and paint it on the lights
    pub async fn apply(&self, art: AlbumArt) -> Result<Palette> {
        let bytes = match art {
            AlbumArt::Bytes(bytes) => bytes,
            AlbumArt::Url(url) => self.inner.transport.fetch_bytes(&url).await?,
        };

        let extractor = self.inner.extractor.clone();
        let palette = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| HueError::Image(format!("Palette extraction aborted: {}", e)))?;

        if palette.is_empty() {
            tracing::info!("Album art produced no colors, leaving lights unchanged");
            return Ok(palette);
        }

        self.inner
            .dispatcher
            .dispatch(&palette, &self.inner.lights, &self.inner.session)
            .finish()
            .await?;
        Ok(palette)
    }

    fn is_new_track(&self, change: &TrackChange) -> bool {
        let Some(uri) = &change.track_uri else {
            return true;
        };
        let mut last = self.inner.last_track.lock().unwrap_or_else(|p| p.into_inner());
        if last.as_deref() == Some(uri.as_str()) {
            return false;
        }
        *last = Some(uri.clone());
        true
    }

    fn forget_track(&self, uri: &str) {
        let mut last = self.inner.last_track.lock().unwrap_or_else(|p| p.into_inner());
        // a newer track may have replaced it meanwhile
        if last.as_deref() == Some(uri) {
            *last = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HttpMethod;
    use crate::test_support::{png_bytes, FakeTransport};
    use crate::types::{Light, LightType, Rgb};
    use serde_json::json;

    const ART_URL: &str = "https://i.scdn.co/image/ab67616d0000b273";

    fn state_url(id: &str) -> String {
        format!("http://10.0.0.2/api/abc/lights/{}/state", id)
    }

    fn pipeline(transport: Arc<FakeTransport>) -> LightSync {
        let lights = LightGroup::with_lights(vec![
            Light::new("1", "Desk", LightType::Color),
            Light::new("2", "Shelf", LightType::Color),
        ]);
        for id in ["1", "2"] {
            transport.reply(HttpMethod::Put, &state_url(id), json!([{"success": {}}]));
        }
        LightSync::new(
            transport.clone(),
            PaletteExtractor::default(),
            LightDispatcher::new(transport),
            lights,
            BridgeSession::authorized("10.0.0.2", "abc"),
        )
    }

    #[test]
    fn image_uri_resolves_to_cdn_url() {
        assert_eq!(
            AlbumArt::from_image_uri("spotify:image:ab67616d0000b273"),
            Some(AlbumArt::Url(ART_URL.to_string()))
        );
        assert_eq!(
            AlbumArt::from_image_uri("ImageUri{raw='spotify:image:ab67616d0000b273'}"),
            Some(AlbumArt::Url(ART_URL.to_string()))
        );
        assert_eq!(AlbumArt::from_image_uri("spotify:image:"), None);
    }

    #[tokio::test]
    async fn downloaded_art_is_painted() {
        let transport = FakeTransport::new();
        transport.serve_bytes(ART_URL, png_bytes(8, 8, |_, _| [10, 200, 10]));
        let sync = pipeline(transport.clone());

        let palette = sync.apply(AlbumArt::Url(ART_URL.to_string())).await.unwrap();
        assert_eq!(palette.dominant(), Some(Rgb::new(10, 200, 10)));
        assert_eq!(transport.count(HttpMethod::Put), 2);
    }

    #[tokio::test]
    async fn undecodable_art_leaves_lights_alone() {
        let transport = FakeTransport::new();
        let sync = pipeline(transport.clone());

        let palette = sync.apply(AlbumArt::Bytes(b"garbage".to_vec())).await.unwrap();
        assert!(palette.is_empty());
        assert_eq!(transport.count(HttpMethod::Put), 0);
    }

    #[tokio::test]
    async fn failed_download_is_reported() {
        let transport = FakeTransport::new();
        let sync = pipeline(transport.clone());
        assert!(sync.apply(AlbumArt::Url(ART_URL.to_string())).await.is_err());
        assert_eq!(transport.count(HttpMethod::Put), 0);
    }

    #[tokio::test]
    async fn repeated_track_is_ignored() {
        let transport = FakeTransport::new();
        let sync = pipeline(transport.clone());
        let art = AlbumArt::Bytes(png_bytes(4, 4, |_, _| [200, 0, 0]));

        let first = sync.on_track_changed(TrackChange::new("spotify:track:1", art.clone()));
        first.unwrap().await.unwrap();
        assert!(sync
            .on_track_changed(TrackChange::new("spotify:track:1", art.clone()))
            .is_none());

        let next = sync.on_track_changed(TrackChange::new("spotify:track:2", art));
        next.unwrap().await.unwrap();
        assert_eq!(transport.count(HttpMethod::Put), 4);
    }

    #[tokio::test]
    async fn failed_track_is_retried() {
        let transport = FakeTransport::new();
        let sync = pipeline(transport.clone());
        let change = TrackChange::new("spotify:track:5", AlbumArt::Url(ART_URL.to_string()));

        sync.on_track_changed(change.clone()).unwrap().await.unwrap();
        assert_eq!(transport.count(HttpMethod::Put), 0);

        transport.serve_bytes(ART_URL, png_bytes(4, 4, |_, _| [0, 200, 200]));
        let retry = sync.on_track_changed(change.clone());
        retry.unwrap().await.unwrap();
        assert_eq!(transport.count(HttpMethod::Put), 2);

        assert!(sync.on_track_changed(change).is_none());
    }

    #[tokio::test]
    async fn run_consumes_events() {
        let transport = FakeTransport::new();
        let sync = pipeline(transport.clone());
        let (tx, rx) = mpsc::channel(4);

        let art = AlbumArt::Bytes(png_bytes(4, 4, |_, _| [0, 0, 200]));
        tx.send(TrackChange::new("spotify:track:9", art)).await.unwrap();
        drop(tx);
        sync.run(rx).await;

        // the spawned handler finishes shortly after run returns
        for _ in 0..100 {
            if transport.count(HttpMethod::Put) == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(transport.count(HttpMethod::Put), 2);
    }
}
