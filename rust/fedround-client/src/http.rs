use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use fedround_core::{
    message::{Message, Task},
    ClientId,
};

use crate::traits::{CoordinatorClient, Delivery};

/// Error returned by the [`HttpClient`].
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid coordinator address: {0}")]
    InvalidAddress(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to (de)serialize data: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("unexpected response from the coordinator: {0}")]
    UnexpectedResponse(StatusCode),
}

#[derive(Debug, Clone)]
/// A client that communicates with the coordinator's API via HTTP.
pub struct HttpClient {
    /// HTTP client
    client: reqwest::Client,
    /// Coordinator URL, always ending with a `/`
    base_url: Url,
}

impl HttpClient {
    /// Creates a new HTTP client.
    ///
    /// `address` is either a `host:port` pair or a URL of the coordinator.
    ///
    /// # Errors
    /// Fails if `address` is not a valid base URL.
    pub fn new(address: &str) -> Result<Self, HttpError> {
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let mut base_url =
            Url::parse(&address).map_err(|e| HttpError::InvalidAddress(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(HttpError::InvalidAddress(
                "cannot be a base URL".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Appends the given segment to the base URL.
    fn url(&self, segment: &str) -> Result<Url, HttpError> {
        self.base_url
            .join(segment)
            .map_err(|e| HttpError::InvalidAddress(e.to_string()))
    }
}

#[async_trait]
impl CoordinatorClient for HttpClient {
    type Error = HttpError;

    async fn register(&mut self) -> Result<ClientId, Self::Error> {
        let url = self.url("register")?;
        let resp = self.client.post(url).send().await?;
        match resp.status() {
            StatusCode::OK => {
                let body = resp.bytes().await?;
                Ok(bincode::deserialize(&body[..])?)
            }
            status => Err(HttpError::UnexpectedResponse(status)),
        }
    }

    async fn task(&mut self, client_id: &ClientId) -> Result<Task, Self::Error> {
        let mut url = self.url("task")?;
        url.query_pairs_mut()
            .append_pair("client_id", &client_id.to_string());
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            StatusCode::OK => {
                let body = resp.bytes().await?;
                Ok(bincode::deserialize(&body[..])?)
            }
            status => Err(HttpError::UnexpectedResponse(status)),
        }
    }

    async fn send(&mut self, message: Message) -> Result<Delivery, Self::Error> {
        let url = self.url("message")?;
        let body = bincode::serialize(&message)?;
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(Delivery::Accepted),
            StatusCode::CONFLICT => Ok(Delivery::Rejected),
            status => Err(HttpError::UnexpectedResponse(status)),
        }
    }
}
