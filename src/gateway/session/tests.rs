use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    io::DuplexStream,
    net::UdpSocket,
    sync::mpsc::{UnboundedReceiver, unbounded_channel},
    task::JoinHandle,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::protocol::{CloseFrame, Message, Role, frame::coding::CloseCode},
};

use super::{VoiceGateway, types::SessionOutcome};
use crate::{
    common::errors::{GatewayError, GatewayResult},
    configs::VoiceConfig,
    gateway::{
        credentials::Credentials,
        discovery::encode_discovery_response,
        events::{DiagnosticCategory, EventEmitter, VoiceEvent},
        protocol::EncryptionModes,
        state::SessionState,
    },
};

type Relay = WebSocketStream<DuplexStream>;

async fn socket_pair() -> (Relay, Relay) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
    (client, server)
}

async fn gateway(
    local_endpoint: Option<SocketAddr>,
) -> (Arc<VoiceGateway>, UnboundedReceiver<VoiceEvent>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind udp");
    let (tx, rx) = unbounded_channel();
    let gateway = VoiceGateway::new(
        Credentials::new(10u64, 20u64, "sess", "tok"),
        "relay.invalid",
        local_endpoint,
        Arc::new(socket),
        VoiceConfig {
            discovery_timeout_ms: 2_000,
            ..VoiceConfig::default()
        },
        EventEmitter::new(Some(tx)),
    );
    (Arc::new(gateway), rx)
}

fn spawn_run(
    gateway: &Arc<VoiceGateway>,
    client: Relay,
) -> JoinHandle<GatewayResult<SessionOutcome>> {
    let gateway = gateway.clone();
    tokio::spawn(async move { gateway.run_on(client).await })
}

async fn recv_json(relay: &mut Relay) -> Value {
    loop {
        let msg = relay
            .next()
            .await
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json message");
        }
    }
}

async fn send_json(relay: &mut Relay, value: Value) {
    relay
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

async fn next_event(
    rx: &mut UnboundedReceiver<VoiceEvent>,
    mut wanted: impl FnMut(&VoiceEvent) -> bool,
) -> VoiceEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event in time")
}

fn hello() -> Value {
    json!({"op": 8, "d": {"heartbeat_interval": 41250.0}})
}

fn ready(port: u16, modes: &[&str]) -> Value {
    json!({"op": 2, "d": {"ssrc": 1234, "ip": "127.0.0.1", "port": port, "modes": modes}})
}

fn session_description() -> Value {
    json!({"op": 4, "d": {"mode": "xsalsa20_poly1305_lite", "secret_key": ([7u8; 32])}})
}

/// Drives Hello -> Identify and checks the Identify payload.
async fn greet(relay: &mut Relay) {
    send_json(relay, hello()).await;
    let identify = recv_json(relay).await;
    assert_eq!(
        identify,
        json!({"op": 0, "d": {"server_id": "20", "user_id": "10", "session_id": "sess", "token": "tok"}})
    );
}

#[tokio::test]
async fn known_local_endpoint_skips_discovery() {
    let local: SocketAddr = "198.51.100.7:40000".parse().expect("addr");
    let (gw, mut events) = gateway(Some(local)).await;
    let udp_relay = UdpSocket::bind("127.0.0.1:0").await.expect("bind relay");
    let relay_port = udp_relay.local_addr().expect("addr").port();

    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    greet(&mut relay).await;
    send_json(&mut relay, ready(relay_port, &["xsalsa20_poly1305_lite"])).await;

    let select = recv_json(&mut relay).await;
    assert_eq!(
        select,
        json!({"op": 1, "d": {"protocol": "udp", "data": {
            "address": "198.51.100.7", "port": 40000, "mode": "xsalsa20_poly1305_lite"
        }}})
    );

    let mut buf = [0u8; 128];
    let stray = tokio::time::timeout(Duration::from_millis(100), udp_relay.recv_from(&mut buf));
    assert!(stray.await.is_err(), "no discovery packet expected");

    send_json(&mut relay, session_description()).await;
    next_event(&mut events, |e| matches!(e, VoiceEvent::Connected { .. })).await;

    assert_eq!(gw.state(), SessionState::Ready);
    let params = gw.parameters().borrow().clone();
    assert!(params.is_ready());
    assert_eq!(params.ssrc, Some(1234));
    assert_eq!(params.local_endpoint, Some(local));
    assert_eq!(params.session_key.expect("key").as_bytes(), &[7u8; 32]);

    gw.set_speaking(true, 0).expect("speaking");
    assert_eq!(
        recv_json(&mut relay).await,
        json!({"op": 5, "d": {"speaking": true, "delay": 0, "ssrc": 1234}})
    );

    gw.cancel();
    let result = run.await.expect("join");
    assert!(matches!(result, Err(GatewayError::Cancelled)));
    assert_eq!(gw.state(), SessionState::Initialized);
}

#[tokio::test]
async fn unknown_local_endpoint_runs_one_discovery_exchange() {
    let (gw, mut events) = gateway(None).await;
    let udp_relay = UdpSocket::bind("127.0.0.1:0").await.expect("bind relay");
    let relay_port = udp_relay.local_addr().expect("addr").port();
    let discovered: SocketAddr = "203.0.113.9:51000".parse().expect("addr");

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 128];
        let (n, from) = udp_relay.recv_from(&mut buf).await.expect("discovery request");
        assert_eq!(n, 70);
        udp_relay
            .send_to(&encode_discovery_response(discovered), from)
            .await
            .expect("reply");
        udp_relay
    });

    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    greet(&mut relay).await;
    send_json(&mut relay, ready(relay_port, &["xsalsa20_poly1305_lite"])).await;

    let select = recv_json(&mut relay).await;
    assert_eq!(select["op"], 1);
    assert_eq!(select["d"]["data"]["address"], "203.0.113.9");
    assert_eq!(select["d"]["data"]["port"], 51000);

    let event = next_event(&mut events, |e| {
        matches!(e, VoiceEvent::LocalEndpoint { .. })
    })
    .await;
    assert!(matches!(event, VoiceEvent::LocalEndpoint { endpoint, .. } if endpoint == discovered));
    assert_eq!(gw.parameters().borrow().local_endpoint, Some(discovered));

    // Exactly one exchange: nothing else reaches the relay.
    let udp_relay = responder.await.expect("responder");
    let mut buf = [0u8; 128];
    let extra = tokio::time::timeout(Duration::from_millis(100), udp_relay.recv_from(&mut buf));
    assert!(extra.await.is_err());

    gw.cancel();
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn first_heartbeat_waits_for_the_full_interval() {
    let (gw, _events) = gateway(None).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    greet(&mut relay).await;

    let early = tokio::time::timeout(Duration::from_millis(41_249), recv_json(&mut relay)).await;
    assert!(early.is_err(), "heartbeat sent before the interval elapsed");

    assert_eq!(recv_json(&mut relay).await, json!({"op": 3, "d": 0}));
    assert_eq!(gw.ping(), -1);

    send_json(&mut relay, json!({"op": 6, "d": 0})).await;
    assert_eq!(recv_json(&mut relay).await, json!({"op": 3, "d": 1}));
    assert!(gw.ping() >= 0);

    gw.cancel();
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
}

#[tokio::test]
async fn second_run_is_rejected_without_state_change() {
    let (gw, _events) = gateway(None).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);
    greet(&mut relay).await;
    assert_eq!(gw.state(), SessionState::Connected);

    let (second, _second_relay) = socket_pair().await;
    let err = gw.run_on(second).await.expect_err("already running");
    assert!(matches!(err, GatewayError::AlreadyRunning));
    assert_eq!(gw.state(), SessionState::Connected);

    gw.cancel();
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
    assert_eq!(gw.state(), SessionState::Initialized);
}

#[tokio::test]
async fn ready_without_lite_mode_fails_the_run() {
    let (gw, mut events) = gateway(Some("127.0.0.1:1".parse().expect("addr"))).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    greet(&mut relay).await;
    send_json(
        &mut relay,
        ready(50000, &["xsalsa20_poly1305", "xsalsa20_poly1305_suffix"]),
    )
    .await;

    let err = run.await.expect("join").expect_err("unsupported mode");
    assert!(matches!(
        err,
        GatewayError::UnsupportedMode(modes)
            if modes == EncryptionModes::NORMAL | EncryptionModes::SUFFIX
    ));
    assert!(err.is_fatal());
    assert_eq!(gw.state(), SessionState::Initialized);
    let params = gw.parameters().borrow().clone();
    assert!(params.ssrc.is_none());
    assert!(params.relay_endpoint.is_none());
    assert!(params.session_key.is_none());

    // A rejected Ready announces nothing.
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, VoiceEvent::RemoteEndpoint { .. }),
            "unexpected {event:?}"
        );
    }
}

#[tokio::test]
async fn malformed_message_is_skipped() {
    let (gw, mut events) = gateway(None).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    send_json(&mut relay, json!({"op": 2, "d": {"ssrc": 1}})).await;
    relay
        .send(Message::Text("not json".into()))
        .await
        .expect("send");

    let diag = next_event(&mut events, |e| matches!(e, VoiceEvent::Diagnostic { .. })).await;
    assert!(matches!(
        diag,
        VoiceEvent::Diagnostic {
            category: DiagnosticCategory::Signaling,
            ..
        }
    ));

    // The connection survives both.
    greet(&mut relay).await;
    assert!(gw.parameters().borrow().ssrc.is_none());

    gw.cancel();
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
}

#[tokio::test]
async fn unknown_and_speaking_opcodes_are_ignored() {
    let (gw, _events) = gateway(None).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    send_json(&mut relay, json!({"op": 5, "d": {"user_id": "1", "ssrc": 2, "speaking": 1}})).await;
    send_json(&mut relay, json!({"op": 42, "d": null})).await;
    greet(&mut relay).await;

    gw.cancel();
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
}

#[tokio::test]
async fn heartbeat_ack_mismatch_is_only_a_diagnostic() {
    let (gw, mut events) = gateway(None).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    greet(&mut relay).await;
    send_json(&mut relay, json!({"op": 6, "d": 99})).await;

    let diag = next_event(&mut events, |e| matches!(e, VoiceEvent::Diagnostic { .. })).await;
    assert!(matches!(
        diag,
        VoiceEvent::Diagnostic {
            category: DiagnosticCategory::Heartbeat,
            ..
        }
    ));
    assert_eq!(gw.state(), SessionState::Connected);
    assert_eq!(gw.ping(), -1);

    gw.cancel();
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
}

#[tokio::test]
async fn close_codes_choose_the_outcome() {
    for (code, expected) in [
        (4014u16, SessionOutcome::Shutdown),
        (4006u16, SessionOutcome::Reconnect),
    ] {
        let (gw, mut events) = gateway(None).await;
        let (client, mut relay) = socket_pair().await;
        let run = spawn_run(&gw, client);

        greet(&mut relay).await;
        relay
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "bye".into(),
            }))
            .await
            .expect("close");

        assert_eq!(run.await.expect("join").expect("outcome"), expected);
        let closed = next_event(&mut events, |e| matches!(e, VoiceEvent::Closed { .. })).await;
        assert!(matches!(closed, VoiceEvent::Closed { code: c, .. } if c == code));
        assert_eq!(gw.state(), SessionState::Initialized);
    }
}

#[tokio::test]
async fn ended_run_withdraws_the_session_parameters() {
    let local: SocketAddr = "198.51.100.7:40000".parse().expect("addr");
    let (gw, mut events) = gateway(Some(local)).await;
    let params = gw.parameters();
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);

    greet(&mut relay).await;
    send_json(&mut relay, ready(50000, &["xsalsa20_poly1305_lite"])).await;
    assert_eq!(recv_json(&mut relay).await["op"], 1);
    send_json(&mut relay, session_description()).await;
    next_event(&mut events, |e| matches!(e, VoiceEvent::Connected { .. })).await;
    assert!(params.borrow().is_ready());
    assert_eq!(gw.handshakes(), 1);

    relay
        .close(Some(CloseFrame {
            code: CloseCode::from(4014),
            reason: "kicked".into(),
        }))
        .await
        .expect("close");
    assert_eq!(
        run.await.expect("join").expect("outcome"),
        SessionOutcome::Shutdown
    );

    let after = params.borrow().clone();
    assert!(after.transmit_target().is_none());
    assert!(after.session_key.is_none());
    assert_eq!(after.local_endpoint, Some(local));
    assert_eq!(gw.handshakes(), 1);
    assert!(matches!(
        gw.set_speaking(true, 0),
        Err(GatewayError::NotConnected)
    ));
}

#[tokio::test]
async fn set_speaking_requires_a_finished_handshake() {
    let (gw, _events) = gateway(None).await;
    assert!(matches!(
        gw.set_speaking(true, 0),
        Err(GatewayError::NotConnected)
    ));

    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);
    greet(&mut relay).await;
    assert!(matches!(
        gw.set_speaking(true, 0),
        Err(GatewayError::NotConnected)
    ));

    gw.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn dispose_is_exactly_once_and_final() {
    let (gw, _events) = gateway(None).await;
    let (client, mut relay) = socket_pair().await;
    let run = spawn_run(&gw, client);
    greet(&mut relay).await;

    assert!(gw.dispose());
    assert!(!gw.dispose());
    assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
    assert_eq!(gw.state(), SessionState::Disposed);

    let (again, _relay) = socket_pair().await;
    assert!(matches!(
        gw.run_on(again).await,
        Err(GatewayError::InvalidStateTransition {
            from: SessionState::Disposed,
            ..
        })
    ));
}

#[tokio::test]
async fn cancelled_gateway_can_run_again() {
    let (gw, _events) = gateway(None).await;

    for _ in 0..2 {
        let (client, mut relay) = socket_pair().await;
        let run = spawn_run(&gw, client);
        greet(&mut relay).await;
        gw.cancel();
        assert!(matches!(run.await.expect("join"), Err(GatewayError::Cancelled)));
        assert_eq!(gw.state(), SessionState::Initialized);
    }
}
