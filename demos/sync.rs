//! Pair with a bridge and paint its lights from album art.
//!
//! Each line read from stdin is one track change: a `spotify:image:<code>`
//! reference, an image URL, or a path to a local image file.
//!
//! ```text
//! RUST_LOG=debug cargo run --example sync
//! ```

use hue_ambience::{
    AlbumArt, BridgeConnector, BridgeDirectory, BridgeSession, BridgeState, Config,
    FileBridgeStore, LightDispatcher, LightInventory, LightSync, PaletteExtractor,
    ReqwestTransport, TrackChange,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const LINK_WINDOW: Duration = Duration::from_secs(30);

async fn session(connector: &BridgeConnector, directory: &BridgeDirectory) -> Result<BridgeSession, Box<dyn std::error::Error>> {
    if let Some(status) = connector.resume() {
        if status.wait().await == BridgeState::Authorized {
            if let Ok(session) = connector.require_session() {
                println!("Reconnected to bridge at {}", session.address);
                return Ok(session);
            }
        }
        println!("Saved bridge is not reachable, pairing again");
        connector.forget()?;
    }

    let bridges = directory.discover().await?;
    let bridge = bridges.first().ok_or("No bridge visible on this network")?;
    println!("Press the link button on the bridge at {} ...", bridge.address);
    Ok(connector.pair(&bridge.address, LINK_WINDOW).await?)
}

fn art_from_line(line: &str) -> Option<AlbumArt> {
    if line.starts_with("http://") || line.starts_with("https://") {
        return Some(AlbumArt::Url(line.to_string()));
    }
    if line.starts_with("spotify:") {
        return AlbumArt::from_image_uri(line);
    }
    match std::fs::read(line) {
        Ok(bytes) => Some(AlbumArt::Bytes(bytes)),
        Err(e) => {
            eprintln!("Cannot read {}: {}", line, e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    let transport = Arc::new(ReqwestTransport::with_timeout(config.request_timeout())?);
    let store = match &config.store_path {
        Some(path) => FileBridgeStore::new(path),
        None => FileBridgeStore::open_default()?,
    };

    let connector = BridgeConnector::new(transport.clone(), Arc::new(store), config.device_type());
    let directory = BridgeDirectory::with_url(transport.clone(), config.discovery_url.clone());
    let session = session(&connector, &directory).await?;

    let lights = LightInventory::new(transport.clone()).list_lights(&session);
    let mut updates = lights.subscribe();
    let _ = tokio::time::timeout(Duration::from_secs(5), updates.changed()).await;
    for light in lights.snapshot().iter() {
        println!("  {} {} ({:?})", light.id, light.name, light.light_type);
    }

    let sync = LightSync::new(
        transport.clone(),
        PaletteExtractor::new(config.palette),
        LightDispatcher::new(transport)
            .with_transition_time(config.transition_time)
            .with_max_in_flight(config.max_in_flight),
        lights,
        session,
    );

    let (tx, rx) = mpsc::channel(8);
    let runner = tokio::spawn(sync.run(rx));

    println!("Enter album art (spotify:image:..., URL or file), Ctrl-D to quit");
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut counter = 0u64;
    while let Some(line) = stdin.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(art) = art_from_line(line) {
            counter += 1;
            tx.send(TrackChange::new(format!("line:{}", counter), art)).await?;
        }
    }

    drop(tx);
    runner.await?;
    // let the last commands land
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}
