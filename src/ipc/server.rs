//! Unix domain socket server for IPC
//!
//! Provides request-response communication and pushes session snapshots and
//! state events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::session::{SessionHandle, SessionSnapshot};

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted frame body
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: Arc<ClientContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler can see
struct ClientContext {
    session: SessionHandle,
    events: broadcast::Sender<StateEvent>,
    start_time: Instant,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn new(
        socket_path: &Path,
        session: SessionHandle,
        events: broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context: Arc::new(ClientContext {
                session,
                events,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Disconnect clients and remove the socket file
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Per-client push state once `subscribe` was requested
struct Subscription {
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Receiver<StateEvent>,
}

impl Subscription {
    fn new(context: &ClientContext) -> Self {
        Self {
            snapshots: context.session.subscribe(),
            events: context.events.subscribe(),
        }
    }

    /// Current snapshot, marked as seen
    fn current(&mut self) -> Notification {
        Notification::Session(self.snapshots.borrow_and_update().clone())
    }

    /// Next notification, or None once the session is gone
    async fn next(&mut self) -> Option<Notification> {
        loop {
            tokio::select! {
                changed = self.snapshots.changed() => {
                    changed.ok()?;
                    return Some(self.current());
                }
                event = self.events.recv() => match event {
                    Ok(event) => return Some(Notification::StateEvent(event)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged behind state events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

async fn next_notification(subscription: &mut Option<Subscription>) -> Option<Notification> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Serve one client until it disconnects
///
/// Requests are decoded on a separate task so pushes never interrupt a
/// partially read frame.
async fn handle_client<S>(stream: S, context: Arc<ClientContext>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (request_tx, mut request_rx) = mpsc::channel(8);
    let reader_task = tokio::spawn(read_requests(reader, request_tx));

    let mut subscription: Option<Subscription> = None;

    let result: Result<()> = async {
        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let request = match request {
                        Some(Ok(request)) => request,
                        Some(Err(message)) => {
                            let response = Response::error("invalid_request", message);
                            write_frame(&mut writer, &response).await?;
                            continue;
                        }
                        None => return Ok(()),
                    };

                    debug!(?request, "received request");
                    let (response, subscribe) = process_request(request, &context).await;
                    write_frame(&mut writer, &response).await?;

                    if subscribe && subscription.is_none() {
                        debug!("client subscribed to notifications");
                        let mut fresh = Subscription::new(&context);
                        let current = fresh.current();
                        subscription = Some(fresh);
                        write_frame(&mut writer, &current).await?;
                    }
                }
                notification = next_notification(&mut subscription) => match notification {
                    Some(notification) => write_frame(&mut writer, &notification).await?,
                    None => subscription = None,
                },
            }
        }
    }
    .await;

    reader_task.abort();
    result
}

/// Decode request frames until EOF or a framing error
async fn read_requests<R>(mut reader: R, request_tx: mpsc::Sender<Result<Request, String>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                warn!(%e, "dropping client");
                return;
            }
        };

        let request = serde_json::from_slice(&frame).map_err(|e| e.to_string());
        if request_tx.send(request).await.is_err() {
            return;
        }
    }
}

/// Process a request
/// Returns (Response, should_subscribe)
async fn process_request(request: Request, context: &ClientContext) -> (Response, bool) {
    match request {
        Request::Ping => (Response::Pong, false),

        Request::GetStatus => {
            let uptime_secs = context.start_time.elapsed().as_secs();
            let status = DaemonStatus::new(context.session.snapshot(), uptime_secs);
            (Response::Status(status), false)
        }

        Request::SetListening { enabled } => match context.session.set_listening(enabled).await {
            Ok(()) => {
                info!(enabled, "listening toggled via IPC");
                (Response::Listening { enabled }, false)
            }
            Err(e) => (Response::error("session_unavailable", e.to_string()), false),
        },

        Request::Subscribe => (Response::Subscribed, true),
    }
}

/// Read one length-prefixed frame; `None` on a clean EOF between frames
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit");
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("connection closed mid-frame")?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(msg)?;
    let len = u32::try_from(body.len()).context("message too large")?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::de::DeserializeOwned;
    use tokio::io::DuplexStream;
    use tokio_test::assert_err;

    use super::*;
    use crate::config::{CaptureConfig, SessionConfig};
    use crate::session::{Services, SessionController};
    use crate::testing::{MockPermission, MockResponder, MockSpeaker, MockTranscriber};

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut bytes = (body.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&5u32.to_le_bytes())
            .read(b"hello")
            .build();

        let body = read_frame(&mut mock).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"hello"[..]));
        assert_eq!(read_frame(&mut mock).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&(2 * MAX_FRAME_LEN as u32).to_le_bytes())
            .build();
        assert_err!(read_frame(&mut mock).await);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&10u32.to_le_bytes())
            .read(b"short")
            .build();
        assert_err!(read_frame(&mut mock).await);
    }

    #[tokio::test]
    async fn test_write_frame() {
        let body = br#"{"type":"pong"}"#;
        let mut mock = tokio_test::io::Builder::new()
            .write(&(body.len() as u32).to_le_bytes())
            .write(body)
            .build();
        write_frame(&mut mock, &Response::Pong).await.unwrap();
    }

    struct Fixture {
        _controller: SessionController<MockTranscriber>,
        events: broadcast::Sender<StateEvent>,
        client: DuplexStream,
    }

    fn connect() -> Fixture {
        let mic = MockTranscriber::new();
        let (events, _) = broadcast::channel(16);
        let services = Services {
            speaker: Arc::new(MockSpeaker::new(mic.clone(), Duration::ZERO)),
            responder: Arc::new(MockResponder::new(mic.clone(), "{}")),
            permission: Arc::new(MockPermission::new(true)),
        };
        let controller = SessionController::new(
            mic,
            services,
            CaptureConfig::default(),
            SessionConfig::default(),
            events.clone(),
        );

        let context = Arc::new(ClientContext {
            session: controller.handle(),
            events: events.clone(),
            start_time: Instant::now(),
        });
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handle_client(server_side, context));

        Fixture {
            _controller: controller,
            events,
            client,
        }
    }

    async fn send(client: &mut DuplexStream, request: &Request) {
        write_frame(client, request).await.unwrap();
    }

    async fn recv<T: DeserializeOwned>(client: &mut DuplexStream) -> T {
        let body = read_frame(client).await.unwrap().expect("server hung up");
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let mut fx = connect();

        send(&mut fx.client, &Request::Ping).await;
        assert_eq!(recv::<Response>(&mut fx.client).await, Response::Pong);

        send(&mut fx.client, &Request::GetStatus).await;
        match recv::<Response>(&mut fx.client).await {
            Response::Status(status) => {
                assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
                assert_eq!(status.session, SessionSnapshot::default());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_listening_is_acknowledged() {
        let mut fx = connect();

        send(&mut fx.client, &Request::SetListening { enabled: false }).await;
        assert_eq!(
            recv::<Response>(&mut fx.client).await,
            Response::Listening { enabled: false }
        );
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error() {
        let mut fx = connect();

        fx.client.write_all(&frame(b"not json")).await.unwrap();
        match recv::<Response>(&mut fx.client).await {
            Response::Error { code, .. } => assert_eq!(code, "invalid_request"),
            other => panic!("unexpected response: {other:?}"),
        }

        // The connection survives
        send(&mut fx.client, &Request::Ping).await;
        assert_eq!(recv::<Response>(&mut fx.client).await, Response::Pong);
    }

    #[tokio::test]
    async fn test_subscriber_receives_pushes() {
        let mut fx = connect();

        send(&mut fx.client, &Request::Subscribe).await;
        assert_eq!(recv::<Response>(&mut fx.client).await, Response::Subscribed);
        assert_eq!(
            recv::<Notification>(&mut fx.client).await,
            Notification::Session(SessionSnapshot::default())
        );

        fx.events.send(StateEvent::SpeechStarted).unwrap();
        assert_eq!(
            recv::<Notification>(&mut fx.client).await,
            Notification::StateEvent(StateEvent::SpeechStarted)
        );
    }
}
