//! API endpoint integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chime_relay::api::triggers::TriggersResponse;
use chime_relay::api::{ApiServerBuilder, ApiState};
use chime_relay::channel::{ChannelClient, ChannelPresence, ConnectionState};
use chime_relay::voice::{MAX_REJOIN_ATTEMPTS, VoiceConnectionManager, VoiceState};
use chime_relay::{Config, Daemon, HitMessage, Trigger, match_keyword};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

mod common;
use common::{FakeGateway, PlayLog, write_wav};

struct TestApi {
    router: axum::Router,
    voice: VoiceConnectionManager,
    gateway: Arc<FakeGateway>,
    _inbox: mpsc::Receiver<String>,
}

/// Build a test API router
fn build_test_router() -> TestApi {
    let (relay_inbox, inbox) = mpsc::channel(8);
    let gateway = FakeGateway::ready();
    let voice = VoiceConnectionManager::new(gateway.clone());
    let state = ApiState {
        relay_inbox,
        presence: Arc::new(ChannelPresence::new()),
        voice: voice.clone(),
        triggers: Arc::new(vec![
            Trigger::new("bell", 1.0),
            Trigger::new("Bell", 0.5),
            Trigger::new("gong", 2.0),
        ]),
        cooldown_ms: 1500,
    };
    TestApi {
        router: ApiServerBuilder::new(state).build().router(),
        voice,
        gateway,
        _inbox: inbox,
    }
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_channel_and_voice() {
    let api = build_test_router();

    let response = api
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["channel"]["state"], "disconnected");
    assert_eq!(json["channel"]["clients"], 0);
    assert_eq!(json["voice"]["state"], "destroyed");
    assert!(json["voice"].get("reason").is_none());
    assert!(json["voice"]["since"].is_string());
}

#[tokio::test]
async fn triggers_are_deduplicated_for_display() {
    let api = build_test_router();

    let response = api
        .router
        .oneshot(Request::get("/api/triggers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["cooldown_ms"], 1500);
    let keywords: Vec<_> = json["triggers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["keyword"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(keywords, ["bell", "gong"]);

    let response: TriggersResponse = serde_json::from_value(json).unwrap();
    let triggers = response.into_triggers();
    assert_eq!(
        match_keyword("strike the GONG", &triggers).map(|t| t.keyword.as_str()),
        Some("gong")
    );
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let api = build_test_router();

    let response = api
        .router
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn voice_join_and_leave() {
    let api = build_test_router();

    let response = api
        .router
        .clone()
        .oneshot(post_json("/api/voice/join", &json!({"destination": "lounge"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["state"], "ready");
    assert_eq!(json["destination"], "lounge");
    assert!(api.voice.is_ready());

    let response = api
        .router
        .oneshot(Request::post("/api/voice/leave").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["state"], "destroyed");
    assert!(json.get("destination").is_none());
    assert!(!api.voice.is_held());
    assert_eq!(api.gateway.last().current(), VoiceState::Destroyed);
}

#[tokio::test]
async fn voice_join_rejects_blank_destination() {
    let api = build_test_router();

    let response = api
        .router
        .oneshot(post_json("/api/voice/join", &json!({"destination": "  "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "bad_request");
    assert!(api.gateway.connections().is_empty());
}

#[tokio::test(start_paused = true)]
async fn voice_join_times_out_when_never_ready() {
    let gateway = FakeGateway::stalled();
    let voice = VoiceConnectionManager::new(gateway.clone());
    let state = ApiState {
        relay_inbox: mpsc::channel(1).0,
        presence: Arc::new(ChannelPresence::new()),
        voice: voice.clone(),
        triggers: Arc::new(Vec::new()),
        cooldown_ms: 1500,
    };
    let router = ApiServerBuilder::new(state).build().router();

    let response = router
        .oneshot(post_json("/api/voice/join", &json!({"destination": "lounge"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_ready");
    assert!(!voice.is_held());
    assert_eq!(gateway.last().current(), VoiceState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn voice_join_recovers_after_rejoins_exhausted() {
    let api = build_test_router();
    api.voice.join("lounge").await.unwrap();

    let first = api.gateway.last();
    first.rejoin_recovers(false);
    first.drop_link();

    // Backoff totals 1 + 2 + 3 + 4 + 5 seconds, then the connection is destroyed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(first.rejoins.load(Ordering::SeqCst), MAX_REJOIN_ATTEMPTS);
    assert!(!api.voice.is_held());
    assert!(!api.voice.is_ready());

    let response = api
        .router
        .oneshot(post_json("/api/voice/join", &json!({"destination": "lounge"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(api.voice.is_ready());
    assert_eq!(api.gateway.connections().len(), 2);
}

struct Running {
    addr: std::net::SocketAddr,
    log: PlayLog,
    voice: VoiceConnectionManager,
    stop: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<chime_relay::Result<()>>,
    _dir: tempfile::TempDir,
}

async fn start_relay() -> Running {
    let dir = tempfile::tempdir().unwrap();
    write_wav(&dir.path().join("bell.wav"), 20);
    write_wav(&dir.path().join("gong.wav"), 20);

    let toml = r#"
        cooldown_ms = 1000

        [voice]
        destination = "lounge"

        [[sounds]]
        keywords = ["bell"]
        file = "bell.wav"

        [[sounds]]
        keywords = ["gong"]
        file = "gong.wav"
        volume = 0.5
    "#;
    let config = Config::from_toml(toml, dir.path()).unwrap();

    let gateway = FakeGateway::ready();
    let log = gateway.log.clone();
    let daemon = Daemon::with_gateway(config, gateway);
    let voice = daemon.voice().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(daemon.serve(listener, async {
        let _ = stop_rx.await;
    }));

    // Auto-join runs in the background
    eventually("voice ready", || voice.is_ready()).await;

    Running {
        addr,
        log,
        voice,
        stop,
        server,
        _dir: dir,
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn listener_hit_is_played() {
    let relay = start_relay().await;

    let client = ChannelClient::connect(format!("ws://{}/ws", relay.addr));
    eventually("channel connection", || client.is_connected()).await;

    let hit = HitMessage {
        keyword: "gong".to_string(),
        text: Some("bang the gong".to_string()),
        ts: 1_700_000_000_000,
        volume: None,
    };
    assert!(client.send(&hit));

    eventually("playback", || relay.log.len() == 1).await;
    let played = relay.log.records();
    assert!(played[0].source.ends_with("gong.wav"));
    assert!((played[0].volume - 0.5).abs() < f64::EPSILON);

    client.close();
    relay.stop.send(()).unwrap();
    relay.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let relay = start_relay().await;
    let url = format!("ws://{}/ws", relay.addr);

    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    socket.send(Message::Text("this is not json".into())).await.unwrap();
    socket
        .send(Message::Text(r#"{"type":"hit"}"#.into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.log.len(), 0);

    // Same socket still delivers
    socket
        .send(Message::Text(r#"{"type":"hit","keyword":"bell"}"#.into()))
        .await
        .unwrap();
    eventually("playback", || relay.log.len() == 1).await;

    let health: serde_json::Value =
        reqwest::get(format!("http://{}/health", relay.addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(health["channel"]["state"], "connected");
    assert_eq!(health["channel"]["clients"], 1);
    assert_eq!(health["voice"]["destination"], "lounge");
    assert!(relay.voice.is_ready());

    relay.stop.send(()).unwrap();
    relay.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn send_while_disconnected_is_dropped() {
    // Nothing listens on this port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ChannelClient::connect(format!("ws://{addr}/ws"));
    let hit = HitMessage {
        keyword: "bell".to_string(),
        text: None,
        ts: 0,
        volume: None,
    };
    assert!(!client.send(&hit));
    client.close();
}

#[tokio::test]
async fn client_reconnects_after_relay_drop_and_stops_on_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepted = Arc::new(AtomicUsize::new(0));
    let (drop_first, first_dropped) = oneshot::channel::<()>();
    let (drop_second, mut second_dropped) = oneshot::channel::<()>();
    let (frames_tx, mut frames) = mpsc::unbounded_channel::<String>();

    let server = tokio::spawn({
        let accepted = Arc::clone(&accepted);
        async move {
            // First connection: held until told to drop, without a close handshake
            let (tcp, _) = listener.accept().await.unwrap();
            accepted.fetch_add(1, Ordering::SeqCst);
            let socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = first_dropped.await;
            drop(socket);

            // Second connection: forward frames until told to drop
            let (tcp, _) = listener.accept().await.unwrap();
            accepted.fetch_add(1, Ordering::SeqCst);
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            loop {
                tokio::select! {
                    message = socket.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let _ = frames_tx.send(text.to_string());
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    _ = &mut second_dropped => break,
                }
            }
            drop(socket);

            // Anything after this is an unwanted reconnect
            while let Ok((tcp, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                drop(tcp);
            }
        }
    });

    let delay = Duration::from_millis(500);
    let client = ChannelClient::connect_with_delay(format!("ws://{addr}/ws"), delay);
    let hit = HitMessage {
        keyword: "bell".to_string(),
        text: None,
        ts: 1,
        volume: None,
    };

    eventually("first connection", || client.is_connected()).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    // Relay drops the socket: disconnected, and sends are dropped
    drop_first.send(()).unwrap();
    eventually("disconnect", || client.state() == ConnectionState::Disconnected).await;
    assert!(!client.send(&hit));

    // Reconnects on its own after the delay
    eventually("reconnection", || client.is_connected()).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert!(client.send(&hit));
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.contains(r#""keyword":"bell""#));

    // Dropped again; closing while the reconnect is pending cancels it
    drop_second.send(()).unwrap();
    eventually("second disconnect", || client.state() == ConnectionState::Disconnected).await;
    client.close();

    tokio::time::sleep(delay * 3).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    server.abort();
}
