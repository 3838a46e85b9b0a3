//! The streaming connection: a background task that owns the socket and drives
//! [`ConnectionManager`].
//!
//! A [`Connection`] is a cheap handle onto that task.  Commands go in over a channel, decoded
//! frames come out over another, and the state is published through a watch so callers can check
//! it without a round trip.  Every frame is tagged with the epoch of the `connect` call that
//! opened its socket; the session uses the tag to drop frames that belong to a chat it has left.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use url::Url;

use crate::connection::{ConnectionAction, ConnectionManager, ConnectionScope, ConnectionState};
use crate::error::{Error, Result};
use crate::observability::{
    FRAMES_MALFORMED, FRAMES_RECEIVED, FRAMES_SENT, SOCKET_CLOSED, SOCKET_OPEN_FAILED,
    SOCKET_OPENED,
};
use crate::types::{ProtocolEvent, SendFrame};

/// Both directions of one open socket, as text frames.
pub struct WireChannel {
    /// Text frames to write.  Dropping the sender closes the socket.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Text frames read, ending when the socket closes.
    pub inbound: BoxStream<'static, Result<String>>,
}

/// Opens sockets to the streaming endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens one socket serving `scope`.
    async fn connect(&self, scope: &ConnectionScope) -> Result<WireChannel>;
}

/// Opens real websockets, forwarding the session cookies on the handshake.
#[derive(Clone)]
pub struct WebSocketConnector {
    url: Url,
    cookies: Option<Arc<reqwest::cookie::Jar>>,
}

impl WebSocketConnector {
    /// Creates a connector for the given `ws://` or `wss://` URL.
    pub fn new(url: Url) -> Self {
        Self { url, cookies: None }
    }

    /// Sends cookies from `jar` with the handshake.
    pub fn with_cookies(mut self, jar: Arc<reqwest::cookie::Jar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// The endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        use reqwest::cookie::CookieStore;

        let mut request = self.url.as_str().into_client_request()?;
        let Some(jar) = &self.cookies else {
            return Ok(request);
        };
        // The jar is keyed by the http(s) origin the cookies were set on.
        let mut origin = self.url.clone();
        let scheme = if self.url.scheme() == "wss" {
            "https"
        } else {
            "http"
        };
        if origin.set_scheme(scheme).is_err() {
            return Ok(request);
        }
        if let Some(value) = jar.cookies(&origin) {
            let value = HeaderValue::from_bytes(value.as_bytes()).map_err(|err| {
                Error::encoding("invalid cookie header", Some(Box::new(err)))
            })?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, scope: &ConnectionScope) -> Result<WireChannel> {
        let request = self.request()?;
        tracing::debug!(url = %self.url, %scope, "opening websocket");
        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, stream) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = sink.send(WsMessage::Text(text)).await {
                    tracing::warn!(error = %err, "websocket write failed");
                    return;
                }
            }
            if let Err(err) = sink.close().await {
                tracing::debug!(error = %err, "websocket close failed");
            }
        });
        let inbound = stream
            .filter_map(|message| async move {
                match message {
                    Ok(WsMessage::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(err) => Some(Err(Error::from(err))),
                }
            })
            .boxed();
        Ok(WireChannel { outbound, inbound })
    }
}

/// What came off a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A decoded protocol event.
    Protocol(ProtocolEvent),
    /// The socket closed without being asked to.  It is always the last event of its socket.
    Lost,
}

/// An inbound event and the epoch of the socket it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// The epoch passed to the `connect` call that opened the socket.
    pub epoch: u64,
    /// The decoded event.
    pub event: InboundEvent,
}

enum Command {
    Connect {
        scope: ConnectionScope,
        epoch: u64,
    },
    Send {
        frame: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Handle onto the connection task.
///
/// Dropping the handle stops the task and closes its socket.
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Spawns the connection task.
    ///
    /// The task starts disconnected; frames arrive on the returned receiver.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<InboundFrame>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let driver = Driver {
            connector,
            manager: ConnectionManager::new(reconnect_delay),
            epoch: 0,
            commands: commands_rx,
            frames,
            state,
            socket: None,
            opening: None,
            reconnect: None,
        };
        tokio::spawn(driver.run());
        (
            Self {
                commands,
                state: state_rx,
            },
            frames_rx,
        )
    }

    /// Opens a socket for `scope`, replacing the current one.  Frames are tagged with `epoch`.
    pub fn connect(&self, scope: ConnectionScope, epoch: u64) -> Result<()> {
        self.command(Command::Connect { scope, epoch })
    }

    /// Closes the socket without reconnecting.
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }

    /// Serializes and writes one frame.
    ///
    /// Fails with [`Error::NotConnected`] unless the socket is open.
    pub async fn send(&self, frame: &SendFrame) -> Result<()> {
        let frame = serde_json::to_string(frame)?;
        let (reply, reply_rx) = oneshot::channel();
        self.command(Command::Send { frame, reply })?;
        reply_rx.await.map_err(|_| stopped())?
    }

    /// The most recently published state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns true if the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::connection("connection task stopped", None)
}

struct OpenSocket {
    generation: u64,
    epoch: u64,
    outbound: mpsc::UnboundedSender<String>,
    inbound: BoxStream<'static, Result<String>>,
}

type Opening = BoxFuture<'static, (u64, Result<WireChannel>)>;

struct Driver {
    connector: Arc<dyn Connector>,
    manager: ConnectionManager,
    epoch: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::UnboundedSender<InboundFrame>,
    state: watch::Sender<ConnectionState>,
    socket: Option<OpenSocket>,
    opening: Option<Opening>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                (generation, opened) = next_open(&mut self.opening) => {
                    self.opening = None;
                    self.on_open_result(generation, opened);
                }
                (generation, frame) = next_frame(&mut self.socket) => {
                    self.on_frame(generation, frame);
                }
                _ = next_timer(&mut self.reconnect) => {
                    self.reconnect = None;
                    let actions = self.manager.on_reconnect_timer();
                    tracing::info!(attempt = self.manager.reconnects(), "reconnecting");
                    self.perform(actions);
                }
            }
            let next = self.manager.state();
            self.state.send_if_modified(|state| {
                let changed = *state != next;
                *state = next;
                changed
            });
        }
        tracing::debug!("connection task stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { scope, epoch } => {
                self.epoch = epoch;
                let actions = self.manager.connect(scope);
                self.perform(actions);
            }
            Command::Send { frame, reply } => {
                let result = self.manager.check_send().and_then(|()| match &self.socket {
                    Some(socket) => socket
                        .outbound
                        .send(frame)
                        .map_err(|_| Error::not_connected("socket writer stopped")),
                    None => Err(Error::not_connected("no socket")),
                });
                if result.is_ok() {
                    FRAMES_SENT.click();
                }
                // The caller may have given up waiting.
                let _ = reply.send(result);
            }
            Command::Close => {
                let actions = self.manager.close();
                self.perform(actions);
            }
        }
    }

    fn on_open_result(&mut self, generation: u64, opened: Result<WireChannel>) {
        match opened {
            Ok(channel) => {
                if self.manager.on_opened(generation) {
                    SOCKET_OPENED.click();
                    tracing::info!(generation, scope = ?self.manager.scope(), "connected");
                    self.socket = Some(OpenSocket {
                        generation,
                        epoch: self.epoch,
                        outbound: channel.outbound,
                        inbound: channel.inbound,
                    });
                }
            }
            Err(err) => {
                SOCKET_OPEN_FAILED.click();
                tracing::warn!(generation, error = %err, "connect failed");
                let actions = self.manager.on_closed(generation);
                self.perform(actions);
            }
        }
    }

    fn on_frame(&mut self, generation: u64, frame: Option<Result<String>>) {
        let epoch = match &self.socket {
            Some(socket) if socket.generation == generation => socket.epoch,
            _ => return,
        };
        match frame {
            Some(Ok(text)) => match serde_json::from_str::<ProtocolEvent>(&text) {
                Ok(event) => {
                    FRAMES_RECEIVED.click();
                    // The session may be gone; frames are dropped with it.
                    let _ = self.frames.send(InboundFrame {
                        epoch,
                        event: InboundEvent::Protocol(event),
                    });
                }
                Err(err) => {
                    FRAMES_MALFORMED.click();
                    tracing::warn!(error = %err, frame = %text, "skipping malformed frame");
                }
            },
            Some(Err(err)) => {
                tracing::warn!(generation, error = %err, "socket failed");
                self.socket_closed(generation, epoch);
            }
            None => {
                tracing::info!(generation, "socket closed");
                self.socket_closed(generation, epoch);
            }
        }
    }

    // Only for sockets that went away on their own; replaced or closed sockets are dropped
    // without a notice.
    fn socket_closed(&mut self, generation: u64, epoch: u64) {
        SOCKET_CLOSED.click();
        self.socket = None;
        let _ = self.frames.send(InboundFrame {
            epoch,
            event: InboundEvent::Lost,
        });
        let actions = self.manager.on_closed(generation);
        self.perform(actions);
    }

    fn perform(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Open { scope, generation } => {
                    self.socket = None;
                    let connector = Arc::clone(&self.connector);
                    self.opening = Some(
                        async move { (generation, connector.connect(&scope).await) }.boxed(),
                    );
                }
                ConnectionAction::CloseSocket => {
                    self.socket = None;
                    self.opening = None;
                }
                ConnectionAction::ScheduleReconnect(delay) => {
                    tracing::info!(?delay, "scheduling reconnect");
                    self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                }
                ConnectionAction::CancelReconnect => {
                    self.reconnect = None;
                }
            }
        }
    }
}

async fn next_open(opening: &mut Option<Opening>) -> (u64, Result<WireChannel>) {
    match opening {
        Some(opening) => opening.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<OpenSocket>) -> (u64, Option<Result<String>>) {
    match socket {
        Some(socket) => (socket.generation, socket.inbound.next().await),
        None => std::future::pending().await,
    }
}

async fn next_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::types::{ChatIdentity, MessageKind, UserMessage};

    struct FakeServer {
        to_client: fmpsc::UnboundedSender<Result<String>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    #[derive(Default)]
    struct FakeConnector {
        attempts: AtomicUsize,
        refuse: AtomicBool,
        scopes: Mutex<Vec<ConnectionScope>>,
        servers: Mutex<Vec<FakeServer>>,
    }

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn server(&self) -> FakeServer {
            self.servers.lock().unwrap().remove(0)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, scope: &ConnectionScope) -> Result<WireChannel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.scopes.lock().unwrap().push(scope.clone());
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::connection("refused", None));
            }
            let (to_client, inbound) = fmpsc::unbounded();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.servers.lock().unwrap().push(FakeServer {
                to_client,
                from_client,
            });
            Ok(WireChannel {
                outbound,
                inbound: inbound.boxed(),
            })
        }
    }

    async fn reach(connection: &Connection, state: ConnectionState) {
        let mut watch = connection.watch_state();
        watch.wait_for(|s| *s == state).await.unwrap();
    }

    fn frame(content: &str) -> SendFrame {
        SendFrame::new(UserMessage::new(content, "m-1", MessageKind::Text), None)
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_decoded_and_tagged() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, mut frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 7).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        let server = connector.server();
        server
            .to_client
            .unbounded_send(Ok(r#"{"type":"token","content":"hi","chat_id":null}"#.into()))
            .unwrap();
        let received = frames.recv().await.unwrap();
        assert_eq!(received.epoch, 7);
        assert_eq!(
            received.event,
            InboundEvent::Protocol(ProtocolEvent::token("hi"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_skipped() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, mut frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        let server = connector.server();
        server.to_client.unbounded_send(Ok("not json".into())).unwrap();
        server
            .to_client
            .unbounded_send(Ok(r#"{"type":"no_such_event"}"#.into()))
            .unwrap();
        server
            .to_client
            .unbounded_send(Ok(r#"{"type":"stream_finished"}"#.into()))
            .unwrap();
        let received = frames.recv().await.unwrap();
        assert_eq!(
            received.event,
            InboundEvent::Protocol(ProtocolEvent::stream_finished())
        );
        assert!(connection.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn send_writes_json_frame() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, _frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        let mut server = connector.server();
        connection.send(&frame("hello")).await.unwrap();
        let written = server.from_client.recv().await.unwrap();
        let parsed: SendFrame = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, frame("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_without_socket_is_rejected() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, _frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        let err = connection.send(&frame("hello")).await.unwrap_err();
        assert!(err.is_not_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_once_after_fixed_delay() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, _frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        drop(connector.server());
        reach(&connection, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(connector.attempts(), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        reach(&connection, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connects_retry_forever() {
        let connector = Arc::new(FakeConnector::default());
        connector.refuse.store(true, Ordering::SeqCst);
        let (connection, _frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(3000 * 10 + 500)).await;
        assert_eq!(connector.attempts(), 11);
        connector.refuse.store(false, Ordering::SeqCst);
        reach(&connection, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn intentional_close_does_not_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, _frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        connection.close().unwrap();
        reach(&connection, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, _frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        drop(connector.server());
        reach(&connection, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        connection.close().unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_socket_is_announced_once() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, mut frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 4).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        let server = connector.server();
        server
            .to_client
            .unbounded_send(Ok(r#"{"type":"token","content":"par"}"#.into()))
            .unwrap();
        drop(server);
        assert_eq!(
            frames.recv().await.unwrap().event,
            InboundEvent::Protocol(ProtocolEvent::token("par"))
        );
        assert_eq!(
            frames.recv().await.unwrap(),
            InboundFrame {
                epoch: 4,
                event: InboundEvent::Lost,
            }
        );

        reach(&connection, ConnectionState::Connected).await;
        connection.close().unwrap();
        reach(&connection, ConnectionState::Disconnected).await;
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_scope_drops_old_socket() {
        let connector = Arc::new(FakeConnector::default());
        let (connection, mut frames) =
            Connection::spawn(connector.clone(), Duration::from_millis(3000));
        connection.connect(ConnectionScope::Draft, 1).unwrap();
        reach(&connection, ConnectionState::Connected).await;
        let old = connector.server();
        let identity = ChatIdentity::new("b", 2.0);
        connection
            .connect(ConnectionScope::Chat(identity.clone()), 2)
            .unwrap();
        let mut watch = connection.watch_state();
        watch
            .wait_for(|s| *s == ConnectionState::Connected && connector.attempts() == 2)
            .await
            .unwrap();
        assert!(old.to_client.unbounded_send(Ok(r#"{"type":"token"}"#.into())).is_err());
        let new = connector.server();
        new.to_client
            .unbounded_send(Ok(r#"{"type":"stream_finished"}"#.into()))
            .unwrap();
        assert_eq!(frames.recv().await.unwrap().epoch, 2);
        assert_eq!(
            connector.scopes.lock().unwrap().last(),
            Some(&ConnectionScope::Chat(identity))
        );
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 2);
    }
}
