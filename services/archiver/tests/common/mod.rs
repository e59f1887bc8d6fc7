#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use camlog_archiver::{BlobStore, CameraRecord, FetchError, LogFetcher, StoreError};
use chrono::{DateTime, Utc};
use digest_auth::AuthorizationHeader;
use md5::{Digest, Md5};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const LOG_PATH: &str = "/axis-cgi/admin/systemlog.cgi";
pub const LOG_BODY: &str = "2024-03-01T14:22:07 camera[1]: boot complete\n";
pub const USERNAME: &str = "root";
pub const PASSWORD: &str = "pass";

const REALM: &str = "AXIS_TEST";
const NONCE: &str = "dcd98b7102dd2f0e8b11d0f600bfb0c093";
const CHALLENGE: &str = r#"Digest realm="AXIS_TEST", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", qop="auth", algorithm=MD5"#;

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Recompute the RFC 2617 `qop=auth` response for `root:pass` and compare.
fn verify_digest(value: &str, method: &str) -> bool {
    let Ok(answer) = AuthorizationHeader::parse(value) else {
        return false;
    };
    let Some(cnonce) = answer.cnonce.as_deref() else {
        return false;
    };
    if answer.username != USERNAME
        || answer.realm != REALM
        || answer.nonce != NONCE
        || answer.uri != LOG_PATH
    {
        return false;
    }

    let ha1 = md5_hex(&format!("{USERNAME}:{REALM}:{PASSWORD}"));
    let ha2 = md5_hex(&format!("{method}:{}", answer.uri));
    let expected = md5_hex(&format!(
        "{ha1}:{NONCE}:{:08x}:{cnonce}:auth:{ha2}",
        answer.nc
    ));
    answer.response == expected
}

/// Serves the log only to a correct digest answer for `root:pass`.
async fn systemlog(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| verify_digest(value, "GET"))
        .unwrap_or(false);

    if authorized {
        (StatusCode::OK, LOG_BODY).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, CHALLENGE)],
        )
            .into_response()
    }
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// In-process camera answering the system log endpoint with digest auth.
pub async fn spawn_camera() -> SocketAddr {
    let app = Router::new()
        .route(LOG_PATH, get(systemlog))
        .route("/broken", get(broken));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn cameras(count: usize) -> Vec<CameraRecord> {
    (0..count)
        .map(|i| {
            let host = format!("10.0.{}.{}", i / 250, i % 250);
            CameraRecord::new(host, 80, USERNAME, PASSWORD)
        })
        .collect()
}

/// Fetcher double that tracks how many fetches overlap.
#[derive(Default)]
pub struct CountingFetcher {
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
    /// Hosts answered with the given status
    failing: HashMap<String, u16>,
    /// Hosts whose fetch panics
    panicking: HashSet<String>,
    /// Cancelled from inside the first fetch
    cancel_on_fetch: Option<CancellationToken>,
}

impl CountingFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(mut self, host: &str, status: u16) -> Self {
        self.failing.insert(host.to_string(), status);
        self
    }

    pub fn panicking(mut self, host: &str) -> Self {
        self.panicking.insert(host.to_string());
        self
    }

    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogFetcher for CountingFetcher {
    async fn fetch(&self, camera: &CameraRecord) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        if self.panicking.contains(&camera.host) {
            panic!("camera {} exploded", camera.host);
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failing.get(&camera.host) {
            Some(status) => Err(FetchError::BadStatus(*status)),
            None => Ok(Bytes::from(format!("log of {}", camera.host))),
        }
    }
}

/// Blob store double keeping objects in memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Bytes, DateTime<Utc>)>>,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub lists: AtomicUsize,
}

impl MemoryStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn insert(&self, key: &str, data: &'static [u8], modified: DateTime<Utc>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from_static(data), modified));
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(data, _)| data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, modified)| *modified)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.objects.lock().unwrap().remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
