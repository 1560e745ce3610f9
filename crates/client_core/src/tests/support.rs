//! In-process STOMP broker used by the transport, session and chat tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::stomp::{self, Command, Frame, HeartBeat};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    time::timeout,
};
use url::Url;

use crate::{config::ClientSettings, transport::TransportConfig};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub(crate) struct BrokerOptions {
    /// `heart-beat` header sent in CONNECTED; `0,0` when unset.
    pub heart_beat: Option<String>,
    /// Answer CONNECT with an ERROR frame carrying this message.
    pub reject_connect: Option<String>,
    /// Also deliver chat.send payloads back to the sender's queue.
    pub echo_to_sender: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ReceivedFrame {
    pub connection: usize,
    pub frame: Frame,
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    subscriptions: Vec<(String, String)>,
}

struct BrokerState {
    options: BrokerOptions,
    connections: Mutex<Vec<Option<Connection>>>,
    received: mpsc::UnboundedSender<ReceivedFrame>,
    heartbeats: AtomicUsize,
    next_message_id: AtomicUsize,
}

pub(crate) struct FakeBroker {
    pub base_url: String,
    received: mpsc::UnboundedReceiver<ReceivedFrame>,
    state: Arc<BrokerState>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::start_with(BrokerOptions::default()).await
    }

    pub async fn start_with(options: BrokerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker");
        let addr = listener.local_addr().expect("broker addr");
        let (received_tx, received) = mpsc::unbounded_channel();
        let state = Arc::new(BrokerState {
            options,
            connections: Mutex::new(Vec::new()),
            received: received_tx,
            heartbeats: AtomicUsize::new(0),
            next_message_id: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&state));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{addr}"),
            received,
            state,
        }
    }

    /// Next frame the broker received with `command`, skipping others.
    pub async fn next_frame(&mut self, command: Command) -> ReceivedFrame {
        timeout(WAIT, async {
            loop {
                let received = self.received.recv().await.expect("broker running");
                if received.frame.command == command {
                    return received;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {command} frame"))
    }

    /// Next SEND frame to `destination`, skipping everything else.
    pub async fn next_send_to(&mut self, destination: &str) -> Value {
        loop {
            let received = self.next_frame(Command::Send).await;
            if received.frame.get("destination") == Some(destination) {
                return serde_json::from_str(&received.frame.body).expect("json body");
            }
        }
    }

    /// Deliver `body` as a MESSAGE to every subscriber of `destination`.
    pub async fn deliver(&self, destination: &str, body: &str) {
        deliver(&self.state, destination, body).await;
    }

    /// Push raw text to every open connection.
    pub async fn send_raw(&self, text: &str) {
        for connection in self.state.connections.lock().await.iter().flatten() {
            let _ = connection.outbound.send(Message::Text(text.to_string()));
        }
    }

    /// Close every open connection from the broker side.
    pub async fn drop_connections(&self) {
        for slot in self.state.connections.lock().await.iter_mut() {
            if let Some(connection) = slot.take() {
                let _ = connection.outbound.send(Message::Close(None));
            }
        }
    }

    pub async fn open_connections(&self) -> usize {
        self.state.connections.lock().await.iter().flatten().count()
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<BrokerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| broker_connection(state, socket))
}

async fn broker_connection(state: Arc<BrokerState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let index = {
        let mut connections = state.connections.lock().await;
        connections.push(Some(Connection {
            outbound: outbound.clone(),
            subscriptions: Vec::new(),
        }));
        connections.len() - 1
    };

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frames = match stomp::decode(&text) {
            Ok(frames) if frames.is_empty() => {
                state.heartbeats.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            Ok(frames) => frames,
            Err(_) => break,
        };
        for frame in frames {
            handle_frame(&state, index, &outbound, &frame).await;
            let _ = state.received.send(ReceivedFrame {
                connection: index,
                frame,
            });
        }
    }

    if let Some(slot) = state.connections.lock().await.get_mut(index) {
        slot.take();
    }
    writer.abort();
}

async fn handle_frame(
    state: &BrokerState,
    index: usize,
    outbound: &mpsc::UnboundedSender<Message>,
    frame: &Frame,
) {
    match frame.command {
        Command::Connect | Command::Stomp => {
            if let Some(reason) = &state.options.reject_connect {
                let error = Frame::new(Command::Error).header("message", reason.as_str());
                let _ = outbound.send(Message::Text(error.encode()));
                let _ = outbound.send(Message::Close(None));
                return;
            }
            let heart_beat = state
                .options
                .heart_beat
                .clone()
                .unwrap_or_else(|| HeartBeat::default().to_string());
            let connected = Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", heart_beat);
            let _ = outbound.send(Message::Text(connected.encode()));
        }
        Command::Subscribe => {
            let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) else {
                return;
            };
            let mut connections = state.connections.lock().await;
            if let Some(Some(connection)) = connections.get_mut(index) {
                connection
                    .subscriptions
                    .push((id.to_string(), destination.to_string()));
            }
        }
        Command::Send if frame.get("destination") == Some("/app/chat.send") => {
            let Ok(body) = serde_json::from_str::<Value>(&frame.body) else {
                return;
            };
            if let Some(receiver) = body["receiver"].as_str() {
                deliver(state, &format!("/queue/messages/{receiver}"), &frame.body).await;
            }
            if state.options.echo_to_sender {
                if let Some(sender) = body["sender"].as_str() {
                    deliver(state, &format!("/queue/messages/{sender}"), &frame.body).await;
                }
            }
        }
        Command::Disconnect => {
            if let Some(receipt) = frame.get("receipt") {
                let reply = Frame::new(Command::Receipt).header("receipt-id", receipt);
                let _ = outbound.send(Message::Text(reply.encode()));
            }
        }
        _ => {}
    }
}

async fn deliver(state: &BrokerState, destination: &str, body: &str) {
    for connection in state.connections.lock().await.iter().flatten() {
        for (id, subscribed) in &connection.subscriptions {
            if subscribed != destination {
                continue;
            }
            let message_id = state.next_message_id.fetch_add(1, Ordering::SeqCst);
            let frame = Frame::new(Command::Message)
                .header("subscription", id.as_str())
                .header("destination", destination)
                .header("message-id", message_id.to_string())
                .header("content-length", body.len().to_string());
            let frame = Frame {
                body: body.to_string(),
                ..frame
            };
            let _ = connection.outbound.send(Message::Text(frame.encode()));
        }
    }
}

pub(crate) fn endpoint(base_url: &str) -> Url {
    Url::parse(&format!("{}/ws", base_url.replacen("http://", "ws://", 1))).expect("endpoint")
}

/// Fast reconnects, no heart-beats.
pub(crate) fn transport_config(base_url: &str) -> TransportConfig {
    TransportConfig {
        endpoint: endpoint(base_url),
        reconnect_delay: Duration::from_millis(50),
        heartbeat: HeartBeat::default(),
        connect_timeout: Duration::from_secs(2),
    }
}

pub(crate) fn client_settings(base_url: &str) -> ClientSettings {
    ClientSettings {
        api_url: base_url.to_string(),
        reconnect_delay: Duration::from_millis(50),
        heartbeat_outgoing: Duration::ZERO,
        heartbeat_incoming: Duration::ZERO,
        connect_timeout: Duration::from_secs(2),
        title_blink_interval: Duration::from_millis(50),
        ..ClientSettings::default()
    }
}

/// Base URL nothing listens on.
pub(crate) async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}
