//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pairwatch_core::data::{MockProvider, PairSeriesStore, ReferenceCatalog};
use pairwatch_core::domain::{Pair, User};
use pairwatch_core::store::{Collection, MemoryStore, UnitOfWork};
use pairwatch_runner::artifact::{
    ArtifactRenderer, CacheError, DeliveryError, DeliveryReceipt, Messenger, RenderError,
    RenderRequest, TokenCache,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const USD_EUR: &[&str] = &["usd", "eur"];
pub const COINS: &[&str] = &["bitcoin", "ethereum", "usd-coin"];

/// Store with the reference catalog loaded.
pub async fn store_with_catalog() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let provider = MockProvider::new().with_catalog(USD_EUR, COINS);
    ReferenceCatalog::new(store.clone())
        .refresh(&provider)
        .await
        .unwrap();
    store
}

/// Insert a user document as-is, bypassing quota validation.
pub async fn seed_user(store: &MemoryStore, user: &User) {
    let mut uow = UnitOfWork::open(store, Collection::Users).await.unwrap();
    uow.create_from(user).await.unwrap();
    uow.commit().await.unwrap();
}

/// Store `samples` hourly prices for each named pair.
pub async fn seed_series(store: &Arc<MemoryStore>, pairs: &[&str], samples: usize) {
    let mut provider = MockProvider::new();
    for name in pairs {
        provider = provider.with_chart(*name, MockProvider::hourly_chart(samples, 100.0));
    }
    let series = PairSeriesStore::new(store.clone());
    for name in pairs {
        let pair: Pair = name.parse().unwrap();
        series.refresh(&provider, &pair).await.unwrap();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    File { chat_id: i64, path: PathBuf },
    Token { chat_id: i64, token: String },
    Text { chat_id: i64, text: String },
}

/// Records every call; uploads answer with tokens T1, T2, ...
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    uploads: AtomicUsize,
    fail_uploads: bool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_file(&self, chat_id: i64, path: &Path) -> Result<DeliveryReceipt, DeliveryError> {
        // The file must still exist while it is being uploaded.
        assert!(path.exists(), "artifact file missing during upload");
        self.sent.lock().push(Sent::File {
            chat_id,
            path: path.to_path_buf(),
        });
        if self.fail_uploads {
            return Err(DeliveryError::Rejected {
                code: Some(400),
                description: "Bad Request: chat not found".into(),
            });
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DeliveryReceipt {
            message_id: Some(n as i64),
            token: format!("T{n}"),
        })
    }

    async fn send_token(&self, chat_id: i64, token: &str) -> Result<DeliveryReceipt, DeliveryError> {
        self.sent.lock().push(Sent::Token {
            chat_id,
            token: token.to_string(),
        });
        Ok(DeliveryReceipt {
            message_id: None,
            token: token.to_string(),
        })
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.sent.lock().push(Sent::Text {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Writes a small placeholder image and records each request.
#[derive(Default)]
pub struct RecordingRenderer {
    requests: Mutex<Vec<RenderRequest>>,
    fail: bool,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ArtifactRenderer for RecordingRenderer {
    async fn render(&self, request: &RenderRequest, output: &Path) -> Result<(), RenderError> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(RenderError::Failed {
                status: "exit status: 1".into(),
                stderr: "no display".into(),
            });
        }
        std::fs::write(output, b"\x89PNG fake")?;
        Ok(())
    }
}

/// Cache whose reads and/or writes always fail.
pub struct BrokenCache {
    pub fail_reads: bool,
    pub fail_writes: bool,
    writes: AtomicUsize,
}

impl BrokenCache {
    pub fn new(fail_reads: bool, fail_writes: bool) -> Self {
        Self {
            fail_reads,
            fail_writes,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        if self.fail_reads {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        Ok(None)
    }

    async fn set(&self, _key: &str, _token: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

pub fn forecast_payload() -> Value {
    serde_json::json!([[1_680_000_000_000i64, 101.5], [1_680_003_600_000i64, 102.0]])
}
