//! HTTP API client with bearer-token auth.
//!
//! Doubles as the delivery fallback path: [`ApiClient::send_message`] is the
//! request/response send used when the realtime transport is unavailable.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use talkline_shared::{ApiError, CreateRoomRequest, Message, Room, SendMessageRequest};

/// HTTP client for the chat REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Configure the bearer token sent with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Make a GET request and decode the JSON response
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.authed(self.client.get(self.url(path)));
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Make a POST request with a JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authed(self.client.post(self.url(path))).json(body);
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Make a PUT request with a JSON body
    pub async fn put_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authed(self.client.put(self.url(path))).json(body);
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let rb = self.authed(self.client.delete(self.url(path)));
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        Ok(())
    }

    // --- Chat API methods ---

    /// List the rooms the current user belongs to
    pub async fn get_rooms(&self) -> Result<Vec<Room>, ApiError> {
        self.get_json("/api/chat/rooms").await
    }

    /// Fetch the message history for a room
    pub async fn get_messages(&self, room_id: &str) -> Result<Vec<Message>, ApiError> {
        self.get_json(&format!("/api/chat/rooms/{room_id}/messages")).await
    }

    /// Send a message over HTTP (the fallback path). Returns the persisted message.
    pub async fn send_message(&self, room_id: &str, content: &str) -> Result<Message, ApiError> {
        let body = SendMessageRequest { content: content.to_string() };
        self.post_json(&format!("/api/chat/rooms/{room_id}/messages"), &body).await
    }

    /// Mark all messages in a room as read
    pub async fn mark_read(&self, room_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .put_json(&format!("/api/chat/rooms/{room_id}/read"), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Create a new room
    pub async fn create_room(&self, name: &str, participants: Vec<String>) -> Result<Room, ApiError> {
        let body = CreateRoomRequest { name: name.to_string(), participants };
        self.post_json("/api/chat/rooms", &body).await
    }

    /// Leave a room
    pub async fn leave_room(&self, room_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/chat/rooms/{room_id}/leave")).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl crate::dispatcher::FallbackSender for ApiClient {
    async fn send_via_fallback(
        &self,
        room_id: &str,
        content: &str,
    ) -> Result<Message, talkline_shared::ChatError> {
        self.send_message(room_id, content)
            .await
            .map_err(talkline_shared::ChatError::SendFailed)
    }
}
