use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::client::error::ClientError;
use crate::db::{Message, User};
use crate::live::LiveEvent;

const FEED_CAPACITY: usize = 64;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream of live events. Dropping the receiver closes the underlying connection.
pub type LiveFeed = mpsc::Receiver<LiveEvent>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub text: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub text: String,
}

/// Server operations the chat store needs.
///
/// Every mutating call resolves only after the server confirmed it and returns
/// the server's copy of the message. Failures of any kind surface as `Err`.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn get_users(&self) -> Result<Vec<User>, ClientError>;

    /// Full history with `peer_id`, oldest first.
    async fn get_messages(&self, peer_id: &str) -> Result<Vec<Message>, ClientError>;

    async fn send_message(&self, peer_id: &str, message: &NewMessage) -> Result<Message, ClientError>;

    async fn update_message(&self, id: &str, update: &MessageUpdate) -> Result<Message, ClientError>;

    /// Tombstones the message. Deleting twice is not an error.
    async fn delete_message(&self, id: &str) -> Result<Message, ClientError>;

    async fn live_feed(&self) -> Result<LiveFeed, ClientError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignupBody<'a> {
    full_name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// `ChatApi` over the HTTP API, keeping the session cookie in its own jar.
#[derive(Clone)]
pub struct HttpChatApi {
    base: Url,
    http: reqwest::Client,
    jar: Arc<Jar>,
}

impl HttpChatApi {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base = Url::parse(base_url).map_err(|e| ClientError::Url(e.to_string()))?;
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { base, http, jar })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::Url(format!("{}: {}", path, e)))
    }

    pub fn has_session(&self) -> bool {
        self.jar.cookies(&self.base).is_some()
    }

    pub async fn signup(&self, full_name: &str, email: &str, password: &str) -> Result<User, ClientError> {
        let body = SignupBody { full_name, email, password };
        let response = self
            .http
            .post(self.url("/api/auth/signup")?)
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let response = self
            .http
            .post(self.url("/api/auth/login")?)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let response = self.http.post(self.url("/api/auth/logout")?).send().await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }

    /// The user the current session belongs to.
    pub async fn check(&self) -> Result<User, ClientError> {
        let response = self.http.get(self.url("/api/auth/check")?).send().await?;
        decode(response).await
    }

    pub async fn update_profile(&self, profile_pic: &str) -> Result<User, ClientError> {
        let response = self
            .http
            .put(self.url("/api/auth/update-profile")?)
            .json(&serde_json::json!({ "profilePic": profile_pic }))
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn get_users(&self) -> Result<Vec<User>, ClientError> {
        let response = self.http.get(self.url("/api/messages/users")?).send().await?;
        decode(response).await
    }

    async fn get_messages(&self, peer_id: &str) -> Result<Vec<Message>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/messages/{}", peer_id))?)
            .send()
            .await?;
        decode(response).await
    }

    async fn send_message(&self, peer_id: &str, message: &NewMessage) -> Result<Message, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/api/messages/send/{}", peer_id))?)
            .json(message)
            .send()
            .await?;
        decode(response).await
    }

    async fn update_message(&self, id: &str, update: &MessageUpdate) -> Result<Message, ClientError> {
        let response = self
            .http
            .patch(self.url(&format!("/api/messages/update/{}", id))?)
            .json(update)
            .send()
            .await?;
        decode(response).await
    }

    async fn delete_message(&self, id: &str) -> Result<Message, ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/messages/delete/{}", id))?)
            .send()
            .await?;
        decode(response).await
    }

    async fn live_feed(&self) -> Result<LiveFeed, ClientError> {
        let mut url = self.url("/api/messages/live")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Url(format!("cannot use {} for {}", scheme, url)))?;

        let mut request = url.as_str().into_client_request()?;
        if let Some(cookie) = self.jar.cookies(&self.base) {
            let value = HeaderValue::from_bytes(cookie.as_bytes())
                .map_err(|e| ClientError::Url(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!(%url, "live feed connected");

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        tokio::spawn(pump_live_events(stream, tx));
        Ok(rx)
    }
}

async fn pump_live_events(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: mpsc::Sender<LiveEvent>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<LiveEvent>(&text) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("ignoring malformed live event: {}", e),
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("live feed error: {}", e);
                    break;
                }
            }
        }
    }

    let _ = stream.close(None).await;
    tracing::debug!("live feed closed");
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
