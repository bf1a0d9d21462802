//! HTTP relay client.
//!
//! Thin JSON-over-HTTP wrapper around the relay endpoints. No protocol
//! logic lives here; callers decide what to do with transport failures,
//! which are generally retriable.

use std::time::Duration;

use ciphera_proto::{AckRequest, CanaryReply, Envelope, PreKeyBundle, Username};
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Relay transport errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The relay base URL did not parse.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    /// Connection-level failure (refused, timed out, TLS).
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay answered with a non-success status.
    #[error("relay returned {status} for {path}")]
    Status {
        /// Request path.
        path: String,
        /// HTTP status code.
        status: StatusCode,
    },

    /// No pre-key bundle is registered under the requested name.
    #[error("user {0} is not registered on the relay")]
    NotRegistered(Username),
}

/// Client for one relay server.
#[derive(Clone)]
pub struct RelayClient {
    base: Url,
    http: reqwest::Client,
}

impl RelayClient {
    /// Build a client for the relay at `base_url`.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidUrl`] when the URL does not parse or has no
    /// host.
    pub fn new(base_url: &str) -> Result<Self, RelayError> {
        let base = Url::parse(base_url).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;
        if base.host_str().is_none() {
            return Err(RelayError::InvalidUrl(format!("{base_url}: missing host")));
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(RelayError::Http)?;
        Ok(Self { base, http })
    }

    /// The relay base URL, normalised.
    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    fn endpoint(&self, path: &str) -> Result<Url, RelayError> {
        self.base.join(path).map_err(|e| RelayError::InvalidUrl(e.to_string()))
    }

    /// `POST /register`: publish a pre-key bundle.
    pub async fn register_bundle(&self, bundle: &PreKeyBundle) -> Result<(), RelayError> {
        let url = self.endpoint("register")?;
        let response = self.http.post(url).json(bundle).send().await?;
        expect_success(response, "register").await.map(|_| ())
    }

    /// `GET /prekey/{username}`: fetch a peer's bundle.
    pub async fn fetch_bundle(&self, username: &Username) -> Result<PreKeyBundle, RelayError> {
        let path = format!("prekey/{username}");
        let url = self.endpoint(&path)?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RelayError::NotRegistered(username.clone()));
        }
        let response = expect_success(response, &path).await?;
        Ok(response.json().await?)
    }

    /// `GET /account/{user}/canary`: fetch the canary stored at
    /// registration.
    pub async fn fetch_canary(&self, username: &Username) -> Result<String, RelayError> {
        let path = format!("account/{username}/canary");
        let url = self.endpoint(&path)?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RelayError::NotRegistered(username.clone()));
        }
        let response = expect_success(response, &path).await?;
        let reply: CanaryReply = response.json().await?;
        Ok(reply.canary)
    }

    /// `POST /msg/{user}`: enqueue an envelope for its recipient.
    pub async fn send_message(&self, envelope: &Envelope) -> Result<(), RelayError> {
        let path = format!("msg/{}", envelope.to);
        let url = self.endpoint(&path)?;
        let response = self.http.post(url).json(envelope).send().await?;
        expect_success(response, &path).await.map(|_| ())
    }

    /// `GET /msg/{user}?limit=N`: peek queued envelopes without removing
    /// them. A `limit` of zero fetches everything.
    pub async fn fetch_messages(
        &self,
        username: &Username,
        limit: usize,
    ) -> Result<Vec<Envelope>, RelayError> {
        let path = format!("msg/{username}");
        let mut url = self.endpoint(&path)?;
        if limit > 0 {
            url.query_pairs_mut().append_pair("limit", &limit.to_string());
        }
        let response = self.http.get(url).send().await?;
        let response = expect_success(response, &path).await?;
        Ok(response.json().await?)
    }

    /// `POST /msg/{user}/ack`: drop the first `count` queued envelopes.
    pub async fn ack_messages(&self, username: &Username, count: usize) -> Result<(), RelayError> {
        let path = format!("msg/{username}/ack");
        let url = self.endpoint(&path)?;
        let response = self.http.post(url).json(&AckRequest { count }).send().await?;
        expect_success(response, &path).await.map(|_| ())
    }
}

async fn expect_success(
    response: reqwest::Response,
    path: &str,
) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RelayError::Status { path: path.to_owned(), status })
    }
}
