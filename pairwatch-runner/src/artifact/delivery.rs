//! Messaging endpoint: photo uploads, re-sends by token, and text notices.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http: {0}")]
    Http(String),

    #[error("endpoint rejected the request ({code:?}): {description}")]
    Rejected { code: Option<i64>, description: String },

    #[error("malformed endpoint response: {0}")]
    MalformedResponse(String),

    #[error("reading artifact file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Http(err.without_url().to_string())
    }
}

/// What the endpoint reports after a photo is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<i64>,
    /// Reference the endpoint accepts in place of a re-upload.
    pub token: String,
}

/// Sends artifacts and notices to chats.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Upload an image file.
    async fn send_file(&self, chat_id: i64, path: &Path) -> Result<DeliveryReceipt, DeliveryError>;

    /// Re-send a previously uploaded image by its token.
    async fn send_token(&self, chat_id: i64, token: &str) -> Result<DeliveryReceipt, DeliveryError>;

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Deserialize)]
struct BotResponse<T> {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: Option<i64>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

fn unwrap_response<T>(resp: BotResponse<T>) -> Result<T, DeliveryError> {
    if !resp.ok {
        return Err(DeliveryError::Rejected {
            code: resp.error_code,
            description: resp.description.unwrap_or_else(|| "no description".into()),
        });
    }
    resp.result
        .ok_or_else(|| DeliveryError::MalformedResponse("ok response without result".into()))
}

/// The photo sizes come smallest first; the last one is the full image.
pub fn parse_photo_response(body: &str) -> Result<DeliveryReceipt, DeliveryError> {
    let resp: BotResponse<MessageResult> =
        serde_json::from_str(body).map_err(|e| DeliveryError::MalformedResponse(e.to_string()))?;
    let message = unwrap_response(resp)?;
    let token = message
        .photo
        .last()
        .map(|p| p.file_id.clone())
        .ok_or_else(|| DeliveryError::MalformedResponse("message carries no photo".into()))?;
    Ok(DeliveryReceipt {
        message_id: message.message_id,
        token,
    })
}

/// Telegram Bot API client.
pub struct TelegramMessenger {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramMessenger {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_file(&self, chat_id: i64, path: &Path) -> Result<DeliveryReceipt, DeliveryError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact.png".to_string());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", Part::bytes(bytes).file_name(file_name));

        let body = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?
            .text()
            .await?;
        let receipt = parse_photo_response(&body)?;
        debug!(chat_id, message_id = ?receipt.message_id, "photo uploaded");
        Ok(receipt)
    }

    async fn send_token(&self, chat_id: i64, token: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let body = self
            .client
            .post(self.method_url("sendPhoto"))
            .json(&json!({ "chat_id": chat_id, "photo": token }))
            .send()
            .await?
            .text()
            .await?;
        parse_photo_response(&body)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let body = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?
            .text()
            .await?;
        let resp: BotResponse<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::MalformedResponse(e.to_string()))?;
        unwrap_response(resp)?;
        Ok(())
    }
}
