use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::multipart::{Form, Part};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, CLIENT_TOKEN_REFRESHES,
};
use crate::socket::WebSocketConnector;
use crate::types::{
    ChatIdentity, ChatPage, ChatRecord, ChatSummary, LocalFile, Message, PaginationCursor,
    UploadResponse, UserMessage,
};

/// Client for the chat backend's HTTP API.
///
/// Authentication is cookie based.  Every request shares one cookie jar, and a request answered
/// with 401 triggers one credential refresh and one retry before the error surfaces.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: ReqwestClient,
    cookies: Arc<Jar>,
    base_url: String,
    ws_url: Url,
    timeout: Duration,
    // Counts completed refreshes; callers that saw a 401 before the latest refresh skip their own.
    refreshes: Arc<tokio::sync::Mutex<u64>>,
}

impl ApiClient {
    /// Create a new client for the configured deployment.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_urls(config.api_base()?, config.ws_url()?, config.timeout())
    }

    /// Create a new client with explicit endpoints.
    pub fn with_urls(api_base: Url, ws_url: Url, timeout: Duration) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .cookie_provider(Arc::clone(&cookies))
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            cookies,
            base_url: api_base.as_str().trim_end_matches('/').to_string(),
            ws_url,
            timeout,
            refreshes: Arc::new(tokio::sync::Mutex::new(0)),
        })
    }

    /// The root of the HTTP API.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The cookie jar shared by every request.
    pub fn cookies(&self) -> Arc<Jar> {
        Arc::clone(&self.cookies)
    }

    /// A connector for the streaming endpoint that carries this client's cookies.
    pub fn connector(&self) -> WebSocketConnector {
        WebSocketConnector::new(self.ws_url.clone()).with_cookies(self.cookies())
    }

    /// Log in, storing the session cookies in the jar.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Login<'a> {
            username: &'a str,
            password: &'a str,
        }

        let url = self.endpoint("/user/login");
        let body = Login { username, password };
        let response = self.send(self.client.post(&url).json(&body)).await?;
        Self::check(response).await?;
        tracing::info!(username, "logged in");
        Ok(())
    }

    /// Refresh the session credentials.
    ///
    /// Refreshes are serialized: a caller whose 401 predates a refresh that completed while it
    /// waited for the lock reuses that refresh instead of issuing another.
    async fn refresh_token(&self, seen: u64) -> Result<()> {
        let mut refreshes = self.refreshes.lock().await;
        if *refreshes != seen {
            return Ok(());
        }
        CLIENT_TOKEN_REFRESHES.click();
        tracing::debug!("refreshing credentials");
        let url = self.endpoint("/security/refresh-token");
        let response = self.send(self.client.post(&url)).await?;
        match Self::check(response).await {
            Ok(_) => {
                *refreshes += 1;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential refresh failed");
                Err(Error::authentication(format!("Session expired: {err}")))
            }
        }
    }

    /// Issue a request, refreshing credentials and retrying once on 401.
    async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&ReqwestClient) -> RequestBuilder,
    {
        let seen = *self.refreshes.lock().await;
        let response = self.send(build(&self.client)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response).await;
        }
        self.refresh_token(seen).await?;
        let response = self.send(build(&self.client)).await?;
        Self::check(response).await
    }

    async fn execute_json<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&ReqwestClient) -> RequestBuilder,
    {
        let response = self.execute(build).await?;
        response.json::<T>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let outcome = request.send().await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        outcome.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {}", e),
                    Some(self.timeout.as_secs_f64()),
                )
            } else {
                Error::from(e)
            }
        })
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        CLIENT_REQUEST_ERRORS.click();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Err(Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                ));
            }
        };
        Err(error_for_status(status.as_u16(), &body, retry_after))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map an error response onto an [`Error`].
///
/// The backend reports failures as `{"detail": ...}` where the detail is a string or a list of
/// validation problems.
fn error_for_status(status_code: u16, body: &str, retry_after: Option<u64>) -> Error {
    #[derive(Deserialize)]
    struct ErrorResponse {
        detail: Option<serde_json::Value>,
    }

    let message = match serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.detail)
    {
        Some(serde_json::Value::String(detail)) => detail,
        Some(detail) => detail.to_string(),
        None if body.trim().is_empty() => format!("HTTP {status_code}"),
        None => body.to_string(),
    };
    match status_code {
        400 | 422 => Error::bad_request(message),
        401 => Error::authentication(message),
        403 => Error::permission(message),
        404 => Error::not_found(message, None, None),
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        500 => Error::internal_server(message),
        502..=504 => Error::service_unavailable(message, retry_after),
        _ => Error::api(status_code, message),
    }
}

#[derive(Deserialize)]
struct HistoryBody {
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[async_trait]
impl Backend for ApiClient {
    async fn chat_history(&self, identity: &ChatIdentity) -> Result<ChatRecord> {
        let url = self.endpoint(&format!("/messaging/chat/{}", identity.path()));
        let body: HistoryBody = self.execute_json(|client| client.get(&url)).await?;
        tracing::debug!(%identity, messages = body.messages.len(), "loaded chat history");
        Ok(ChatRecord {
            chat_id: body.chat_id.unwrap_or_else(|| identity.chat_id.clone()),
            timestamp: body.timestamp.unwrap_or(identity.timestamp),
            user_email: body.user_email,
            messages: body.messages,
        })
    }

    async fn list_chats(
        &self,
        limit: usize,
        cursor: Option<&PaginationCursor>,
    ) -> Result<ChatPage> {
        let url = self.endpoint("/messaging/chats");
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("last_eval_key", cursor.to_query_value()));
        }
        self.execute_json(|client| client.get(&url).query(&query))
            .await
    }

    async fn search_chats(&self, term: &str) -> Result<Vec<ChatSummary>> {
        let url = self.endpoint("/messaging/search_chats");
        self.execute_json(|client| client.get(&url).query(&[("search_term", term)]))
            .await
    }

    async fn delete_chat(&self, identity: &ChatIdentity) -> Result<()> {
        let url = self.endpoint(&format!("/messaging/chat/{}", identity.path()));
        self.execute(|client| client.delete(&url)).await?;
        Ok(())
    }

    async fn upload_media(&self, files: &[LocalFile]) -> Result<Vec<String>> {
        let url = self.endpoint("/storage/upload_media");
        let uploaded: UploadResponse = self
            .execute_json(|client| {
                let form = files.iter().fold(Form::new(), |form, file| {
                    let part = Part::bytes(file.content.to_vec()).file_name(file.file_name());
                    form.part("files", part)
                });
                client.post(&url).multipart(form)
            })
            .await?;
        Ok(uploaded.keys)
    }

    async fn generate_image(
        &self,
        identity: &ChatIdentity,
        message: &UserMessage,
    ) -> Result<Message> {
        let url = self.endpoint("/messaging/image_generation");
        let query = [
            ("chat_id", identity.chat_id.clone()),
            ("chat_timestamp", identity.timestamp.to_string()),
        ];
        self.execute_json(|client| client.post(&url).query(&query).json(message))
            .await
    }
}
