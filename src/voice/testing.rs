//! In-process relay used by the voice session tests: a WebSocket listener on
//! loopback plus the UDP socket media is sent to.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, UdpSocket},
    task::JoinHandle,
};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};

use crate::gateway::{encryption::open_lite, params::SessionKey};

pub(crate) const KEY: [u8; 32] = [9; 32];

pub(crate) struct FakeRelay {
    listener: Arc<TcpListener>,
    udp: UdpSocket,
}

impl FakeRelay {
    pub(crate) const SSRC: u32 = 4242;

    pub(crate) async fn bind() -> Self {
        Self {
            listener: Arc::new(TcpListener::bind("127.0.0.1:0").await.expect("bind ws")),
            udp: UdpSocket::bind("127.0.0.1:0").await.expect("bind udp"),
        }
    }

    pub(crate) fn uri(&self) -> String {
        format!(
            "ws://{}",
            self.listener.local_addr().expect("listener addr")
        )
    }

    fn media_port(&self) -> u16 {
        self.udp.local_addr().expect("udp addr").port()
    }

    fn accept(&self) -> impl Future<Output = WebSocketStream<TcpStream>> + Send + 'static {
        let listener = self.listener.clone();
        async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            accept_async(tcp).await.expect("ws handshake")
        }
    }

    /// Answers one full handshake with lite mode and hands back the socket.
    pub(crate) fn serve_handshake(&self) -> JoinHandle<WebSocketStream<TcpStream>> {
        let accept = self.accept();
        let port = self.media_port();
        tokio::spawn(async move {
            let mut ws = accept.await;
            Self::greet(&mut ws).await;
            Self::send_json(&mut ws, Self::ready(port, &["xsalsa20_poly1305_lite"])).await;

            let select = Self::next_json(&mut ws).await;
            assert_eq!(select["op"], 1);
            assert_eq!(select["d"]["data"]["mode"], "xsalsa20_poly1305_lite");

            Self::send_json(
                &mut ws,
                json!({"op": 4, "d": {"mode": "xsalsa20_poly1305_lite", "secret_key": KEY}}),
            )
            .await;
            ws
        })
    }

    /// Stops after Ready, offering only `modes`.
    pub(crate) fn serve_ready_only(&self, modes: &[&str]) -> JoinHandle<()> {
        let accept = self.accept();
        let ready = Self::ready(self.media_port(), modes);
        tokio::spawn(async move {
            let mut ws = accept.await;
            Self::greet(&mut ws).await;
            Self::send_json(&mut ws, ready).await;
            while let Some(Ok(_)) = ws.next().await {}
        })
    }

    /// Accepts the socket and never says anything.
    pub(crate) fn serve_silently(&self) -> JoinHandle<()> {
        let accept = self.accept();
        tokio::spawn(async move {
            let mut ws = accept.await;
            while let Some(Ok(_)) = ws.next().await {}
        })
    }

    /// Greets the next connection, then closes it with `code` before Ready.
    pub(crate) fn serve_and_close(&self, code: u16) -> JoinHandle<()> {
        let accept = self.accept();
        tokio::spawn(async move {
            let mut ws = accept.await;
            Self::greet(&mut ws).await;
            Self::close(&mut ws, code).await;
            while let Some(Ok(_)) = ws.next().await {}
        })
    }

    /// Waits for the media packet whose decrypted payload is `payload`.
    pub(crate) async fn recv_media(&self, payload: &[u8]) -> Vec<u8> {
        let key = SessionKey::new(KEY);
        let mut buf = [0u8; 2048];
        loop {
            let (n, _) = tokio::time::timeout(Duration::from_secs(5), self.udp.recv_from(&mut buf))
                .await
                .expect("media in time")
                .expect("recv");
            let decrypted = open_lite(&key, &buf[12..n]).expect("decrypt");
            if decrypted == payload {
                return buf[..n].to_vec();
            }
        }
    }

    fn ready(port: u16, modes: &[&str]) -> Value {
        json!({"op": 2, "d": {"ssrc": Self::SSRC, "ip": "127.0.0.1", "port": port, "modes": modes}})
    }

    async fn greet<S: AsyncRead + AsyncWrite + Unpin>(ws: &mut WebSocketStream<S>) {
        Self::send_json(ws, json!({"op": 8, "d": {"heartbeat_interval": 41250.0}})).await;
        let identify = Self::next_json(ws).await;
        assert_eq!(identify["op"], 0);
    }

    pub(crate) async fn next_json<S: AsyncRead + AsyncWrite + Unpin>(
        ws: &mut WebSocketStream<S>,
    ) -> Value {
        loop {
            match ws.next().await.expect("socket open").expect("frame") {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("json");
                }
                _ => continue,
            }
        }
    }

    async fn send_json<S: AsyncRead + AsyncWrite + Unpin>(ws: &mut WebSocketStream<S>, value: Value) {
        ws.send(Message::Text(value.to_string().into()))
            .await
            .expect("send");
    }

    pub(crate) async fn close<S: AsyncRead + AsyncWrite + Unpin>(
        ws: &mut WebSocketStream<S>,
        code: u16,
    ) {
        ws.close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "test".into(),
        }))
        .await
        .expect("close");
    }
}
