//! Auto-reconnecting STOMP connection over a WebSocket.
//!
//! [`StompTransport::connect`] spawns a supervisor task that owns the socket.
//! Callers talk to it through a cloneable [`TransportHandle`] and observe it
//! through a single [`TransportEvent`] stream. The supervisor reconnects after
//! `reconnect_delay` until [`TransportHandle::disconnect`] is called or every
//! handle is dropped, and replays all registered subscriptions after each
//! successful handshake.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use shared::stomp::{self, Command, Frame, HeartBeat};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::{
    config::ClientSettings,
    error::{ConfigError, TransportError},
};

/// Silence tolerated on the incoming side, as a multiple of the negotiated
/// heart-beat interval.
const HEARTBEAT_GRACE_FACTOR: u32 = 2;
const EVENT_BUFFER: usize = 256;
const DISCONNECT_RECEIPT: &str = "disconnect";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint: Url,
    pub reconnect_delay: Duration,
    pub heartbeat: HeartBeat,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: settings.ws_endpoint()?,
            reconnect_delay: settings.reconnect_delay,
            heartbeat: HeartBeat::new(settings.heartbeat_outgoing, settings.heartbeat_incoming),
            connect_timeout: settings.connect_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed and every registered subscription was re-sent.
    Connected { attempt: u64 },
    Message {
        subscription: SubscriptionId,
        destination: String,
        body: String,
    },
    /// One per failed attempt, or one per established connection that was lost.
    Error(TransportError),
    /// Terminal: the supervisor has stopped and will not reconnect.
    Closed,
}

enum TransportCommand {
    Subscribe {
        id: SubscriptionId,
        destination: String,
    },
    Send {
        destination: String,
        body: String,
    },
    Disconnect,
}

struct TransportShared {
    connected: AtomicBool,
    stopped: AtomicBool,
    next_subscription: AtomicU64,
}

#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    shared: Arc<TransportShared>,
}

impl TransportHandle {
    /// Register `destination`. The subscription is sent now if connected and
    /// again after every reconnect.
    pub fn subscribe(&self, destination: impl Into<String>) -> SubscriptionId {
        let n = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let id = SubscriptionId(format!("sub-{n}"));
        let _ = self.commands.send(TransportCommand::Subscribe {
            id: id.clone(),
            destination: destination.into(),
        });
        id
    }

    /// Queue a SEND frame. Returns `false`, without queueing, when there is no
    /// live connection.
    pub fn publish(&self, destination: impl Into<String>, body: impl Into<String>) -> bool {
        let destination = destination.into();
        if !self.is_connected() {
            debug!(%destination, "stomp: dropping publish while disconnected");
            return false;
        }
        self.commands
            .send(TransportCommand::Send {
                destination,
                body: body.into(),
            })
            .is_ok()
    }

    pub fn disconnect(&self) {
        let _ = self.commands.send(TransportCommand::Disconnect);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }
}

pub struct StompTransport;

impl StompTransport {
    /// Start connecting in the background. Must be called inside a tokio runtime.
    pub fn connect(config: TransportConfig) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let shared = Arc::new(TransportShared {
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            next_subscription: AtomicU64::new(0),
        });

        tokio::spawn(supervise(config, commands_rx, events_tx, Arc::clone(&shared)));

        (
            TransportHandle {
                commands: commands_tx,
                shared,
            },
            events_rx,
        )
    }
}

enum SessionEnd {
    Stopped,
    Lost(TransportError),
}

async fn supervise(
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<TransportShared>,
) {
    let mut subscriptions: Vec<(SubscriptionId, String)> = Vec::new();
    let mut attempt = 0u64;

    loop {
        if events.is_closed() {
            break;
        }
        attempt += 1;
        info!(endpoint = %config.endpoint, attempt, "stomp: connecting");

        let opened = tokio::select! {
            opened = open_session(&config) => opened,
            _ = wait_for_stop(&mut commands, &mut subscriptions) => break,
        };

        match opened {
            Ok(mut session) => {
                let replayed = session.replay(&subscriptions).await;
                let end = match replayed {
                    Ok(()) => {
                        shared.connected.store(true, Ordering::Release);
                        info!(
                            attempt,
                            subscriptions = subscriptions.len(),
                            "stomp: connected"
                        );
                        let _ = events.send(TransportEvent::Connected { attempt }).await;
                        session.run(&mut commands, &mut subscriptions, &events).await
                    }
                    Err(err) => SessionEnd::Lost(err),
                };
                shared.connected.store(false, Ordering::Release);

                match end {
                    SessionEnd::Stopped => break,
                    SessionEnd::Lost(err) => {
                        warn!(error = %err, "stomp: connection lost");
                        let _ = events.send(TransportEvent::Error(err)).await;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, attempt, "stomp: connection attempt failed");
                let _ = events.send(TransportEvent::Error(err)).await;
            }
        }

        info!(
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "stomp: reconnect scheduled"
        );
        tokio::select! {
            _ = time::sleep(config.reconnect_delay) => {}
            _ = wait_for_stop(&mut commands, &mut subscriptions) => break,
        }
    }

    shared.connected.store(false, Ordering::Release);
    shared.stopped.store(true, Ordering::Release);
    info!("stomp: transport stopped");
    let _ = events.send(TransportEvent::Closed).await;
}

/// Drain commands while there is no live connection. Subscriptions are kept
/// for replay; sends are dropped. Resolves on an explicit disconnect or when
/// every handle is gone.
async fn wait_for_stop(
    commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
    subscriptions: &mut Vec<(SubscriptionId, String)>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            TransportCommand::Subscribe { id, destination } => {
                subscriptions.push((id, destination));
            }
            TransportCommand::Send { destination, .. } => {
                debug!(%destination, "stomp: dropping send while disconnected");
            }
            TransportCommand::Disconnect => return,
        }
    }
}

fn connect_failure(config: &TransportConfig, reason: impl ToString) -> TransportError {
    TransportError::ConnectFailure {
        endpoint: config.endpoint.to_string(),
        reason: reason.to_string(),
    }
}

fn error_frame_reason(frame: &Frame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(message), "") => message.to_string(),
        (Some(message), body) => format!("{message}: {body}"),
        (None, "") => "broker sent ERROR frame".to_string(),
        (None, body) => body.to_string(),
    }
}

async fn open_session(config: &TransportConfig) -> Result<ActiveSession, TransportError> {
    time::timeout(config.connect_timeout, handshake(config))
        .await
        .map_err(|_| connect_failure(config, "handshake timed out"))?
}

async fn handshake(config: &TransportConfig) -> Result<ActiveSession, TransportError> {
    let (mut ws, _) = connect_async(config.endpoint.as_str())
        .await
        .map_err(|err| connect_failure(config, err))?;

    let host = config.endpoint.host_str().unwrap_or("localhost");
    let connect = Frame::connect(host, config.heartbeat).encode();
    trace!(frame = %connect, "stomp: >>>");
    ws.send(Message::Text(connect))
        .await
        .map_err(|err| connect_failure(config, err))?;

    while let Some(msg) = ws.next().await {
        let text = match msg.map_err(|err| connect_failure(config, err))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        trace!(frame = %text, "stomp: <<<");
        let frames = stomp::decode(&text).map_err(|err| connect_failure(config, err))?;
        for frame in frames {
            match frame.command {
                Command::Connected => {
                    let server = frame
                        .get("heart-beat")
                        .and_then(HeartBeat::parse)
                        .unwrap_or_default();
                    let (outgoing, incoming) = config.heartbeat.negotiate(server);
                    debug!(
                        version = frame.get("version").unwrap_or("1.0"),
                        ?outgoing,
                        ?incoming,
                        "stomp: handshake complete"
                    );
                    return Ok(ActiveSession {
                        ws,
                        outgoing,
                        incoming,
                    });
                }
                Command::Error => {
                    return Err(connect_failure(config, error_frame_reason(&frame)));
                }
                other => debug!(command = %other, "stomp: ignoring frame before CONNECTED"),
            }
        }
    }

    Err(connect_failure(config, "connection closed during handshake"))
}

async fn tick_or_pending(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct ActiveSession {
    ws: WsStream,
    outgoing: Option<Duration>,
    incoming: Option<Duration>,
}

impl ActiveSession {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let encoded = frame.encode();
        trace!(frame = %encoded, "stomp: >>>");
        self.ws
            .send(Message::Text(encoded))
            .await
            .map_err(|err| TransportError::TransientNetwork(err.to_string()))
    }

    async fn replay(&mut self, subscriptions: &[(SubscriptionId, String)]) -> Result<(), TransportError> {
        for (id, destination) in subscriptions {
            self.send_frame(Frame::subscribe(id.as_str(), destination))
                .await?;
            debug!(id = id.as_str(), %destination, "stomp: subscribed");
        }
        Ok(())
    }

    async fn run(
        mut self,
        commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
        subscriptions: &mut Vec<(SubscriptionId, String)>,
        events: &mpsc::Sender<TransportEvent>,
    ) -> SessionEnd {
        let mut outgoing_tick = self.outgoing.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let grace = self.incoming.map(|period| period * HEARTBEAT_GRACE_FACTOR);
        let mut last_seen = Instant::now();

        loop {
            let deadline = grace.map(|grace| last_seen + grace);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(TransportCommand::Subscribe { id, destination }) => {
                        if let Err(err) = self
                            .send_frame(Frame::subscribe(id.as_str(), &destination))
                            .await
                        {
                            subscriptions.push((id, destination));
                            return SessionEnd::Lost(err);
                        }
                        debug!(id = id.as_str(), %destination, "stomp: subscribed");
                        subscriptions.push((id, destination));
                    }
                    Some(TransportCommand::Send { destination, body }) => {
                        if let Err(err) = self.send_frame(Frame::send(&destination, body)).await {
                            return SessionEnd::Lost(err);
                        }
                    }
                    Some(TransportCommand::Disconnect) | None => {
                        let _ = self.send_frame(Frame::disconnect(DISCONNECT_RECEIPT)).await;
                        let _ = self.ws.close(None).await;
                        info!("stomp: disconnected");
                        return SessionEnd::Stopped;
                    }
                },
                msg = self.ws.next() => {
                    last_seen = Instant::now();
                    let text = match msg {
                        None => {
                            return SessionEnd::Lost(TransportError::TransientNetwork(
                                "socket closed".to_string(),
                            ))
                        }
                        Some(Err(err)) => {
                            return SessionEnd::Lost(TransportError::TransientNetwork(
                                err.to_string(),
                            ))
                        }
                        Some(Ok(Message::Close(_))) => {
                            return SessionEnd::Lost(TransportError::TransientNetwork(
                                "closed by broker".to_string(),
                            ))
                        }
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    trace!(frame = %text, "stomp: <<<");

                    let frames = match stomp::decode(&text) {
                        Ok(frames) => frames,
                        Err(err) => {
                            return SessionEnd::Lost(TransportError::Protocol(format!(
                                "malformed frame: {err}"
                            )))
                        }
                    };
                    for frame in frames {
                        match frame.command {
                            Command::Message => {
                                let Some(subscription) = frame.get("subscription") else {
                                    warn!("stomp: MESSAGE frame without subscription header");
                                    continue;
                                };
                                let event = TransportEvent::Message {
                                    subscription: SubscriptionId(subscription.to_string()),
                                    destination: frame.get("destination").unwrap_or_default().to_string(),
                                    body: frame.body,
                                };
                                if events.send(event).await.is_err() {
                                    let _ = self.ws.close(None).await;
                                    return SessionEnd::Stopped;
                                }
                            }
                            Command::Error => {
                                let reason = error_frame_reason(&frame);
                                error!(%reason, "stomp: broker reported error");
                                return SessionEnd::Lost(TransportError::Protocol(reason));
                            }
                            other => debug!(command = %other, "stomp: ignoring frame"),
                        }
                    }
                },
                _ = tick_or_pending(outgoing_tick.as_mut()) => {
                    trace!("stomp: >>> heart-beat");
                    if let Err(err) = self.ws.send(Message::Text(stomp::HEARTBEAT.to_string())).await {
                        return SessionEnd::Lost(TransportError::TransientNetwork(err.to_string()));
                    }
                },
                _ = sleep_until_or_pending(deadline) => {
                    return SessionEnd::Lost(TransportError::TransientNetwork(format!(
                        "no data from broker within {} ms",
                        grace.map(|g| g.as_millis()).unwrap_or_default()
                    )));
                },
            }
        }
    }
}
