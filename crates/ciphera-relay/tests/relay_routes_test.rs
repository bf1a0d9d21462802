//! Endpoint-level tests for the relay, driven through `warp::test`.

use ciphera_crypto::{generate_ed25519, generate_x25519, sign};
use ciphera_proto::{
    limits, AckRequest, Envelope, OneTimePreKeyPublic, PreKeyBundle, RatchetHeader, Username,
};
use ciphera_relay::{routes, RelayState};

fn bundle(username: &str) -> PreKeyBundle {
    let (_, identity) = generate_x25519();
    let (ed_priv, ed_pub) = generate_ed25519();
    let (_, spk) = generate_x25519();
    PreKeyBundle {
        username: username.into(),
        canary: "feedface".to_owned(),
        identity_key: identity,
        signing_key: ed_pub,
        signed_pre_key_id: "spk-1".into(),
        signed_pre_key: spk,
        signed_pre_key_signature: sign(&ed_priv, spk.as_bytes()).unwrap(),
        one_time_pre_keys: Vec::new(),
    }
}

fn envelope(from: &str, to: &str, timestamp: i64) -> Envelope {
    Envelope {
        from: from.into(),
        to: to.into(),
        header: RatchetHeader {
            dh_pub: vec![0x11; 32],
            previous_chain_length: 0,
            message_index: 0,
        },
        cipher: vec![0xC0; 48],
        pre_key: None,
        associated_data: None,
        timestamp,
    }
}

#[tokio::test]
async fn register_then_fetch_bundle() {
    let state = RelayState::new();
    let api = routes(state);

    let reply = warp::test::request()
        .method("POST")
        .path("/register")
        .json(&bundle("alice"))
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 204);

    let reply = warp::test::request().path("/prekey/alice").reply(&api).await;
    assert_eq!(reply.status(), 200);
    let served: PreKeyBundle = serde_json::from_slice(reply.body()).unwrap();
    assert_eq!(served.username, Username::from("alice"));

    let reply = warp::test::request().path("/prekey/nobody").reply(&api).await;
    assert_eq!(reply.status(), 404);
}

#[tokio::test]
async fn register_rejects_missing_username_and_canary() {
    let api = routes(RelayState::new());

    let mut nameless = bundle("");
    nameless.username = "".into();
    let reply = warp::test::request()
        .method("POST")
        .path("/register")
        .json(&nameless)
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 400);

    let mut no_canary = bundle("alice");
    no_canary.canary.clear();
    let reply = warp::test::request()
        .method("POST")
        .path("/register")
        .json(&no_canary)
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 400);
}

#[tokio::test]
async fn register_caps_one_time_keys() {
    let api = routes(RelayState::new());

    let mut fat = bundle("alice");
    let (_, public) = generate_x25519();
    fat.one_time_pre_keys = (0..=limits::MAX_ONE_TIME_KEYS)
        .map(|i| OneTimePreKeyPublic {
            one_time_pre_key_id: format!("opk-{i}").as_str().into(),
            one_time_pre_key: public,
        })
        .collect();

    let reply = warp::test::request()
        .method("POST")
        .path("/register")
        .json(&fat)
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 413);
}

#[tokio::test]
async fn last_registration_wins() {
    let api = routes(RelayState::new());

    let first = bundle("alice");
    let second = bundle("alice");
    for b in [&first, &second] {
        let reply = warp::test::request()
            .method("POST")
            .path("/register")
            .json(b)
            .reply(&api)
            .await;
        assert_eq!(reply.status(), 204);
    }

    let reply = warp::test::request().path("/prekey/alice").reply(&api).await;
    let served: PreKeyBundle = serde_json::from_slice(reply.body()).unwrap();
    assert_eq!(served.identity_key, second.identity_key);
}

#[tokio::test]
async fn canary_endpoint_serves_registered_canary() {
    let api = routes(RelayState::new());
    warp::test::request()
        .method("POST")
        .path("/register")
        .json(&bundle("alice"))
        .reply(&api)
        .await;

    let reply = warp::test::request().path("/account/alice/canary").reply(&api).await;
    assert_eq!(reply.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(reply.body()).unwrap();
    assert_eq!(body["canary"], "feedface");

    let reply = warp::test::request().path("/account/ghost/canary").reply(&api).await;
    assert_eq!(reply.status(), 404);
}

#[tokio::test]
async fn enqueue_validates_recipient_and_size() {
    let api = routes(RelayState::new());

    // Route and payload recipient must match.
    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob")
        .json(&envelope("alice", "carol", 0))
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 400);

    // Oversized ciphertext is rejected outright.
    let mut fat = envelope("alice", "bob", 0);
    fat.cipher = vec![0u8; limits::MAX_CIPHER_BYTES + 1];
    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob")
        .json(&fat)
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 413);
}

#[tokio::test]
async fn enqueue_fills_and_validates_timestamps() {
    let state = RelayState::new();
    let api = routes(state);

    // Zero timestamp gets filled with server time.
    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob")
        .json(&envelope("alice", "bob", 0))
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 204);

    let reply = warp::test::request().path("/msg/bob").reply(&api).await;
    let served: Vec<Envelope> = serde_json::from_slice(reply.body()).unwrap();
    assert!(served[0].timestamp > 0);

    // A timestamp beyond the future-skew window is rejected.
    let future = envelope("alice", "bob", served[0].timestamp + limits::MAX_FUTURE_SKEW_SECS + 60);
    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob")
        .json(&future)
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 400);
}

#[tokio::test]
async fn fetch_peeks_and_ack_drops() {
    let state = RelayState::new();
    let api = routes(state.clone());

    for _ in 0..3 {
        warp::test::request()
            .method("POST")
            .path("/msg/bob")
            .json(&envelope("alice", "bob", 0))
            .reply(&api)
            .await;
    }

    // limit honoured; queue untouched by fetching.
    let reply = warp::test::request().path("/msg/bob?limit=2").reply(&api).await;
    let served: Vec<Envelope> = serde_json::from_slice(reply.body()).unwrap();
    assert_eq!(served.len(), 2);
    assert_eq!(state.queue_len(&"bob".into()), 3);

    // limit=0 and absent limit both mean everything.
    for path in ["/msg/bob?limit=0", "/msg/bob"] {
        let reply = warp::test::request().path(path).reply(&api).await;
        let served: Vec<Envelope> = serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(served.len(), 3);
    }

    // Ack drops from the front, clamped to the queue length.
    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob/ack")
        .json(&AckRequest { count: 2 })
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 204);
    assert_eq!(state.queue_len(&"bob".into()), 1);

    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob/ack")
        .json(&AckRequest { count: 99 })
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 204);
    assert_eq!(state.queue_len(&"bob".into()), 0);
}

#[tokio::test]
async fn queue_overflow_drops_oldest() {
    let state = RelayState::new();
    let api = routes(state.clone());

    for i in 0..limits::MAX_QUEUE_LEN + 5 {
        let reply = warp::test::request()
            .method("POST")
            .path("/msg/bob")
            .json(&envelope("alice", "bob", 1_700_000_000 + i as i64))
            .reply(&api)
            .await;
        assert_eq!(reply.status(), 204);
    }
    assert_eq!(state.queue_len(&"bob".into()), limits::MAX_QUEUE_LEN);

    // The head of the queue is now the sixth envelope posted.
    let reply = warp::test::request().path("/msg/bob?limit=1").reply(&api).await;
    let served: Vec<Envelope> = serde_json::from_slice(reply.body()).unwrap();
    assert_eq!(served[0].timestamp, 1_700_000_005);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let api = routes(RelayState::new());

    let reply = warp::test::request()
        .method("POST")
        .path("/register")
        .body("{\"not\": \"a bundle\"}")
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 400);

    let reply = warp::test::request()
        .method("POST")
        .path("/msg/bob/ack")
        .body("{\"count\": -3}")
        .reply(&api)
        .await;
    assert_eq!(reply.status(), 400);

    let reply = warp::test::request().path("/msg/bob?limit=banana").reply(&api).await;
    assert_eq!(reply.status(), 400);
}

#[tokio::test]
async fn healthz_responds() {
    let api = routes(RelayState::new());
    let reply = warp::test::request().path("/healthz").reply(&api).await;
    assert_eq!(reply.status(), 204);
}
