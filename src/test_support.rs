//! Scripted transport and image fixtures for unit tests.

use crate::error::{HueError, Result};
use crate::protocol::HttpMethod;
use crate::transport::HttpTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Clone)]
enum Scripted {
    Json(Value),
    Fail,
}

/// Transport answering from per-route queues; the last reply of a queue repeats
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<(String, String), VecDeque<Scripted>>>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: HttpMethod, url: &str, reply: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry((method.to_string(), url.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn reply(&self, method: HttpMethod, url: &str, value: Value) {
        self.push(method, url, Scripted::Json(value));
    }

    pub fn fail(&self, method: HttpMethod, url: &str) {
        self.push(method, url, Scripted::Fail);
    }

    pub fn serve_bytes(&self, url: &str, bytes: Vec<u8>) {
        self.bytes.lock().unwrap().insert(url.to_string(), bytes);
    }

    /// Hold every JSON request until a permit is added to the returned semaphore
    pub fn gate(&self) -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(semaphore.clone());
        semaphore
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: HttpMethod) -> usize {
        self.requests().iter().filter(|r| r.method == method).count()
    }

    fn next_reply(&self, method: HttpMethod, url: &str) -> Option<Scripted> {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&(method.to_string(), url.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send_json(&self, method: HttpMethod, url: &str, body: Option<Value>) -> Result<Value> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body,
        });

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| HueError::Protocol("gate closed".to_string()))?
                .forget();
        }

        match self.next_reply(method, url) {
            Some(Scripted::Json(value)) => Ok(value),
            Some(Scripted::Fail) => Err(HueError::Timeout),
            None => Err(HueError::Protocol(format!("no scripted reply for {} {}", method, url))),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(HueError::Timeout)
    }
}

/// Encode a PNG whose pixels come from `pixel(x, y)`
pub(crate) fn png_bytes(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| image::Rgb(pixel(x, y)));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
