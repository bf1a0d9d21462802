//! The Ciphera relay: an untrusted store-and-forward queue.
//!
//! The relay holds two things per username: the latest registered pre-key
//! bundle (last writer wins) and a FIFO queue of opaque envelopes. It never
//! sees plaintext or private keys and performs no authentication; its only
//! defences are size caps and timestamp sanity checks.
//!
//! Queue semantics: `GET /msg/{user}` peeks without removing, and
//! `POST /msg/{user}/ack` drops an explicit count from the front. A full
//! queue drops its oldest envelopes; the ratchet downstream degrades
//! gracefully (skipped keys, then a visible gap error) rather than letting
//! one peer wedge a mailbox forever.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use ciphera_proto::{
    limits, AckRequest, CanaryReply, Envelope, ErrorReply, PreKeyBundle, Username,
};
use serde::Deserialize;
use warp::{
    http::StatusCode,
    reply::{self, Reply, Response},
    Filter, Rejection,
};

/// Shared in-memory relay state.
#[derive(Clone, Default)]
pub struct RelayState {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    bundles: HashMap<Username, PreKeyBundle>,
    queues: HashMap<Username, VecDeque<Envelope>>,
}

impl RelayState {
    /// Fresh empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, bundle: PreKeyBundle) {
        let mut inner = self.inner.lock().expect("relay state lock poisoned");
        inner.bundles.insert(bundle.username.clone(), bundle);
    }

    fn bundle(&self, username: &Username) -> Option<PreKeyBundle> {
        let inner = self.inner.lock().expect("relay state lock poisoned");
        inner.bundles.get(username).cloned()
    }

    /// Append an envelope, dropping the oldest beyond the queue cap.
    /// Returns the queue length afterwards.
    fn enqueue(&self, username: &Username, envelope: Envelope) -> usize {
        let mut inner = self.inner.lock().expect("relay state lock poisoned");
        let queue = inner.queues.entry(username.clone()).or_default();
        queue.push_back(envelope);
        while queue.len() > limits::MAX_QUEUE_LEN {
            queue.pop_front();
        }
        queue.len()
    }

    /// Copy up to `limit` envelopes from the front without removing them.
    /// `None` or zero, or anything beyond the queue, yields everything.
    fn peek(&self, username: &Username, limit: Option<usize>) -> Vec<Envelope> {
        let inner = self.inner.lock().expect("relay state lock poisoned");
        let Some(queue) = inner.queues.get(username) else {
            return Vec::new();
        };
        let take = match limit {
            Some(n) if n > 0 && n < queue.len() => n,
            _ => queue.len(),
        };
        queue.iter().take(take).cloned().collect()
    }

    /// Drop up to `count` envelopes from the front; returns the remainder.
    fn ack(&self, username: &Username, count: usize) -> usize {
        let mut inner = self.inner.lock().expect("relay state lock poisoned");
        let Some(queue) = inner.queues.get_mut(username) else {
            return 0;
        };
        let drop = count.min(queue.len());
        queue.drain(..drop);
        queue.len()
    }

    /// Current queue length for a user. Exposed for tests and diagnostics.
    pub fn queue_len(&self, username: &Username) -> usize {
        let inner = self.inner.lock().expect("relay state lock poisoned");
        inner.queues.get(username).map_or(0, VecDeque::len)
    }
}

#[derive(Debug, Deserialize)]
struct FetchQuery {
    limit: Option<usize>,
}

/// All relay routes over the given state, including error recovery and
/// access logging.
pub fn routes(
    state: RelayState,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let register = warp::post()
        .and(warp::path!("register"))
        .and(json_body())
        .and(with_state(state.clone()))
        .map(handle_register);

    let prekey = warp::get()
        .and(warp::path!("prekey" / String))
        .and(with_state(state.clone()))
        .map(handle_prekey);

    let canary = warp::get()
        .and(warp::path!("account" / String / "canary"))
        .and(with_state(state.clone()))
        .map(handle_canary);

    let ack = warp::post()
        .and(warp::path!("msg" / String / "ack"))
        .and(json_body())
        .and(with_state(state.clone()))
        .map(handle_ack);

    let enqueue = warp::post()
        .and(warp::path!("msg" / String))
        .and(json_body())
        .and(with_state(state.clone()))
        .map(handle_enqueue);

    let fetch = warp::get()
        .and(warp::path!("msg" / String))
        .and(warp::query::<FetchQuery>())
        .and(with_state(state))
        .map(handle_fetch);

    let healthz = warp::get()
        .and(warp::path!("healthz"))
        .map(|| StatusCode::NO_CONTENT.into_response());

    register
        .or(prekey)
        .or(canary)
        .or(ack)
        .or(enqueue)
        .or(fetch)
        .or(healthz)
        .recover(handle_rejection)
        .with(warp::log::custom(|info| {
            tracing::info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed_us = info.elapsed().as_micros() as u64,
                "request"
            );
        }))
}

fn with_state(
    state: RelayState,
) -> impl Filter<Extract = (RelayState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(limits::MAX_BODY_BYTES).and(warp::body::json())
}

/// `POST /register`: store a bundle, last writer wins.
fn handle_register(bundle: PreKeyBundle, state: RelayState) -> Response {
    if bundle.username.is_empty() {
        return error_reply(StatusCode::BAD_REQUEST, "username required");
    }
    if bundle.canary.is_empty() {
        return error_reply(StatusCode::BAD_REQUEST, "canary required");
    }
    if bundle.one_time_pre_keys.len() > limits::MAX_ONE_TIME_KEYS {
        return error_reply(StatusCode::PAYLOAD_TOO_LARGE, "too many one-time keys");
    }

    tracing::info!(
        user = %bundle.username,
        spk_id = %bundle.signed_pre_key_id,
        one_time_count = bundle.one_time_pre_keys.len(),
        "register"
    );
    state.register(bundle);
    StatusCode::NO_CONTENT.into_response()
}

/// `GET /prekey/{username}`: serve the stored bundle.
fn handle_prekey(username: String, state: RelayState) -> Response {
    match state.bundle(&Username(username)) {
        Some(bundle) => reply::json(&bundle).into_response(),
        None => error_reply(StatusCode::NOT_FOUND, "not registered"),
    }
}

/// `GET /account/{user}/canary`: serve the canary from the stored bundle.
fn handle_canary(username: String, state: RelayState) -> Response {
    match state.bundle(&Username(username)) {
        Some(bundle) => reply::json(&CanaryReply { canary: bundle.canary }).into_response(),
        None => error_reply(StatusCode::NOT_FOUND, "not registered"),
    }
}

/// `POST /msg/{user}`: validate and enqueue an envelope.
fn handle_enqueue(username: String, mut envelope: Envelope, state: RelayState) -> Response {
    let username = Username(username);
    if envelope.to.is_empty() {
        return error_reply(StatusCode::BAD_REQUEST, "recipient required");
    }
    if username.is_empty() || username != envelope.to {
        return error_reply(StatusCode::BAD_REQUEST, "recipient mismatch");
    }
    if envelope.cipher.len() > limits::MAX_CIPHER_BYTES {
        return error_reply(StatusCode::PAYLOAD_TOO_LARGE, "cipher too large");
    }

    let now = unix_now();
    if envelope.timestamp == 0 {
        envelope.timestamp = now;
    } else if envelope.timestamp > now + limits::MAX_FUTURE_SKEW_SECS {
        return error_reply(StatusCode::BAD_REQUEST, "timestamp in future");
    }

    let from = envelope.from.clone();
    let has_pre_key = envelope.pre_key.is_some();
    let cipher_bytes = envelope.cipher.len();
    let queue_len = state.enqueue(&username, envelope);

    tracing::info!(
        queue_user = %username,
        from = %from,
        cipher_bytes,
        has_pre_key,
        queue_len,
        "enqueue"
    );
    StatusCode::NO_CONTENT.into_response()
}

/// `GET /msg/{user}?limit=N`: peek queued envelopes without removing them.
fn handle_fetch(username: String, query: FetchQuery, state: RelayState) -> Response {
    let username = Username(username);
    let envelopes = state.peek(&username, query.limit);
    tracing::info!(user = %username, served = envelopes.len(), "fetch");
    reply::json(&envelopes).into_response()
}

/// `POST /msg/{user}/ack`: drop an explicit count from the queue front.
fn handle_ack(username: String, ack: AckRequest, state: RelayState) -> Response {
    let username = Username(username);
    let remaining = state.ack(&username, ack.count);
    tracing::info!(user = %username, drop = ack.count, remaining, "ack");
    StatusCode::NO_CONTENT.into_response()
}

/// Map filter rejections onto the protocol's JSON error replies.
async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "bad request")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "body too large")
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "bad limit")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        tracing::error!(?rejection, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };
    Ok(error_reply(status, message))
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    reply::with_status(reply::json(&ErrorReply { error: message.to_owned() }), status)
        .into_response()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
