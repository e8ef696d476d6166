//! Client for the chat backend.
//!
//! [`ChatBackend`] is the seam between the session controller and the
//! network: message submission, the generation stream, best-effort
//! cancellation, the model catalog and the chat list. [`HttpBackend`] talks to
//! the real server over HTTP.

use std::env;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::sse::StreamDecoder;
use crate::types::{
    CancelRequest, ChatId, ChatSummary, ModelInfo, RenameChatRequest, SendAck, SendMessageRequest,
    SuccessResponse,
};

/// Server used when neither the caller nor `LMCHAT_BASE_URL` names one.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/";

/// Environment variable naming the backend.
pub const BASE_URL_ENV: &str = "LMCHAT_BASE_URL";

/// Timeout for requests other than the generation stream.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the session controller needs from the backend.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Store a user message. A successful reply may carry a new chat title.
    async fn send_message(&self, request: &SendMessageRequest) -> Result<SendAck>;

    /// Open the generation stream for the latest message of `chat_id`.
    async fn open_stream(&self, chat_id: &ChatId, model: &str) -> Result<StreamDecoder>;

    /// Ask the backend to stop generating for a chat. Callers treat this as
    /// fire-and-forget.
    async fn cancel_generation(&self, request: &CancelRequest) -> Result<()>;

    /// Fetch the model catalog.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Fetch the chat list, newest first.
    async fn list_chats(&self) -> Result<Vec<ChatSummary>>;

    /// Create an empty chat.
    async fn create_chat(&self) -> Result<ChatSummary>;

    /// Delete a chat and its messages.
    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()>;

    /// Rename a chat.
    async fn rename_chat(&self, request: &RenameChatRequest) -> Result<()>;
}

/// HTTP client for the chat backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    cookie: Option<HeaderValue>,
}

impl HttpBackend {
    /// Create a new backend client.
    ///
    /// The base URL can be provided directly or read from the LMCHAT_BASE_URL
    /// environment variable, falling back to a local server.
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Self::with_options(base_url, None, None)
    }

    /// Create a new client with custom settings.
    ///
    /// `cookie` is sent verbatim as the `Cookie` header of every request, for
    /// backends that key their session on it.
    pub fn with_options(
        base_url: Option<String>,
        timeout: Option<Duration>,
        cookie: Option<String>,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&normalize_base_url(&base_url))?;

        let cookie = cookie
            .map(|cookie| {
                HeaderValue::from_str(&cookie).map_err(|e| {
                    Error::validation(
                        format!("cookie is not a valid header value: {e}"),
                        Some("cookie".to_string()),
                    )
                })
            })
            .transpose()?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        // No client-wide timeout: it would also cut off long generation streams.
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
            cookie,
        })
    }

    /// The server this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(cookie) = &self.cookie {
            headers.insert(header::COOKIE, cookie.clone());
        }
        headers
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        match response.text().await {
            Ok(body) => error_for_status(status_code, &body),
            Err(e) => Error::http_client(
                format!("Failed to read error response: {e}"),
                Some(Box::new(e)),
            ),
        }
    }

    /// Send a request and return the successful response.
    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let started = Instant::now();
        let result = request.send().await;
        CLIENT_REQUEST_DURATION.add(started.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            self.map_send_error(e)
        })?;
        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            Error::serialization(format!("Failed to parse response: {e}"), Some(Box::new(e)))
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self
            .client
            .get(self.endpoint(path)?)
            .headers(self.default_headers())
            .timeout(self.timeout);
        Self::read_json(self.execute(request).await?).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let mut request = self
            .client
            .post(self.endpoint(path)?)
            .headers(self.default_headers())
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::read_json(self.execute(request).await?).await
    }
}

#[async_trait::async_trait]
impl ChatBackend for HttpBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<SendAck> {
        let ack: SendAck = self.post_json("send_message", Some(request)).await?;
        if !ack.is_success() {
            return Err(Error::api(
                200,
                format!("message was not accepted (status {:?})", ack.status),
            ));
        }
        Ok(ack)
    }

    async fn open_stream(&self, chat_id: &ChatId, model: &str) -> Result<StreamDecoder> {
        let mut url = self.endpoint("get_response")?;
        url.query_pairs_mut()
            .append_pair("chat_id", chat_id.as_str())
            .append_pair("model", model);

        let mut headers = self.default_headers();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let response = self
            .execute(self.client.get(url).headers(headers))
            .await?;

        // Get the byte stream from the response
        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });

        Ok(StreamDecoder::from_bytes(stream))
    }

    async fn cancel_generation(&self, request: &CancelRequest) -> Result<()> {
        let _: serde_json::Value = self.post_json("stop_generation", Some(request)).await?;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.get_json("models").await
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        self.get_json("get_chats").await
    }

    async fn create_chat(&self) -> Result<ChatSummary> {
        self.post_json::<(), _>("create_chat", None).await
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        let path = format!("delete_chat/{}", chat_id.as_str());
        let response: SuccessResponse = self.post_json::<(), _>(&path, None).await?;
        expect_success(response, "delete_chat")
    }

    async fn rename_chat(&self, request: &RenameChatRequest) -> Result<()> {
        if request.title.trim().is_empty() {
            return Err(Error::validation(
                "chat title must not be empty",
                Some("title".to_string()),
            ));
        }
        let response: SuccessResponse = self.post_json("update_chat_title", Some(request)).await?;
        expect_success(response, "update_chat_title")
    }
}

fn expect_success(response: SuccessResponse, operation: &str) -> Result<()> {
    if response.success {
        Ok(())
    } else {
        Err(Error::api(200, format!("{operation} reported failure")))
    }
}

/// Ensure the base URL ends in a slash so that `Url::join` appends paths.
fn normalize_base_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    }
}

/// Map an unsuccessful status and its body to an [`Error`].
///
/// The backend reports failures as `{"error": "..."}`; anything else is used
/// verbatim as the message.
fn error_for_status(status_code: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<String>,
    }

    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| body.trim().to_string());

    match status_code {
        401 => Error::unauthorized(message),
        403 => Error::forbidden(message),
        404 => Error::not_found(message, None),
        408 => Error::timeout(message, None),
        500..=599 => Error::internal_server(message),
        _ => Error::api(status_code, message),
    }
}
