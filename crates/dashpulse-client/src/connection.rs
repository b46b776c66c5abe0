//! Connection lifecycle: handshake, heartbeat and reconnect with backoff.
//!
//! The [`ConnectionManager`] owns the live [`Connection`], the in-flight
//! attempt and every timer tied to the transport. It is driven by the engine
//! task and reports what happened through [`ConnectionEvent`]s. Every state
//! change is mirrored into the shared store as a single [`ConnectionStatus`].

use dashpulse_core::{now_millis, ConnectionStatus, StoreWriter, Timestamp};
use dashpulse_protocol::{version, Frame, PROTOCOL_VERSION};
use dashpulse_transport::{Connection, Transport};
use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::metrics;

/// Supplies the bearer credential for each connection attempt.
///
/// Read on every attempt, so a refreshed token is picked up by reconnects.
pub trait CredentialSource: Send + Sync {
    /// The current credential, or `None` if the user is not signed in.
    fn credential(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticCredential(String);

impl StaticCredential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticCredential(..)")
    }
}

impl CredentialSource for StaticCredential {
    fn credential(&self) -> Option<String> {
        (!self.0.is_empty()).then(|| self.0.clone())
    }
}

/// A token read from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvCredential {
    fn credential(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn credential(&self) -> Option<String> {
        self()
    }
}

/// Connection tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reconnect automatically after an unexpected loss.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect; doubled for each following attempt.
    pub base_delay: Duration,
    /// Bound on transport open plus handshake.
    pub timeout: Duration,
    /// Ping cadence while connected.
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl ConnectionOptions {
    /// Backoff delay for a 1-based reconnect attempt, `None` past the cap.
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

/// Partial update of [`ConnectionOptions`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptionsUpdate {
    pub auto_reconnect: Option<bool>,
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
}

impl ConnectionOptionsUpdate {
    pub fn apply_to(&self, options: &mut ConnectionOptions) {
        if let Some(v) = self.auto_reconnect {
            options.auto_reconnect = v;
        }
        if let Some(v) = self.max_attempts {
            options.max_attempts = v;
        }
        if let Some(v) = self.base_delay {
            options.base_delay = v;
        }
        if let Some(v) = self.timeout {
            options.timeout = v;
        }
        if let Some(v) = self.heartbeat_interval {
            options.heartbeat_interval = v;
        }
    }
}

/// An established session.
pub(crate) struct Session {
    connection: Box<dyn Connection>,
    connection_id: String,
}

/// Open the transport and run the handshake, bounded by `timeout`.
async fn establish(
    transport: Arc<dyn Transport>,
    token: String,
    timeout: Duration,
) -> Result<Session, ClientError> {
    tokio::time::timeout(timeout, handshake(transport.as_ref(), token))
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
}

/// Send `connect` and wait for `connected`.
async fn handshake(transport: &dyn Transport, token: String) -> Result<Session, ClientError> {
    let mut connection = transport.open().await?;
    connection
        .send(Frame::connect(PROTOCOL_VERSION, token))
        .await?;

    loop {
        match connection.recv().await? {
            Some(Frame::Connected {
                connection_id,
                version: server,
                heartbeat,
            }) => {
                if !version::is_compatible(server) {
                    let _ = connection.close().await;
                    return Err(ClientError::IncompatibleVersion {
                        server: version::display(server),
                    });
                }
                debug!(
                    connection = %connection_id,
                    server_version = %version::display(server),
                    server_heartbeat_ms = heartbeat,
                    "Handshake completed"
                );
                return Ok(Session {
                    connection,
                    connection_id,
                });
            }
            Some(Frame::DashboardError { error, .. }) => {
                let _ = connection.close().await;
                return Err(ClientError::Rejected(error));
            }
            Some(Frame::Ping { timestamp }) => {
                connection.send(Frame::pong(timestamp)).await?;
            }
            Some(other) => {
                debug!(frame = other.name(), "Ignoring frame before handshake");
            }
            None => {
                return Err(ClientError::Transport(
                    "connection closed during handshake".into(),
                ));
            }
        }
    }
}

/// Something the engine has to react to.
pub(crate) enum ConnectionEvent {
    /// The in-flight attempt finished.
    Attempt(Result<(), ClientError>),
    /// A frame arrived on the live connection.
    Frame(Frame),
    /// The live connection went away.
    Lost(String),
    /// A scheduled reconnect is due.
    ReconnectDue,
    /// Time to ping.
    HeartbeatDue,
}

/// Owns the transport-facing state of one client.
pub(crate) struct ConnectionManager {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    options: ConnectionOptions,
    store: StoreWriter,
    connection: Option<Box<dyn Connection>>,
    attempt: Option<JoinHandle<Result<Session, ClientError>>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    attempts: u32,
    last_connected: Option<Timestamp>,
    error: Option<String>,
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        options: ConnectionOptions,
        store: StoreWriter,
    ) -> Self {
        Self {
            transport,
            credentials,
            options,
            store,
            connection: None,
            attempt: None,
            reconnect: None,
            heartbeat: None,
            attempts: 0,
            last_connected: None,
            error: None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.attempt.is_some()
    }

    /// Apply new options. A running heartbeat picks up a new interval.
    pub(crate) fn update_options(&mut self, update: &ConnectionOptionsUpdate) {
        update.apply_to(&mut self.options);
        if self.heartbeat.is_some() {
            self.heartbeat = Some(self.heartbeat_timer());
        }
        if !self.options.auto_reconnect {
            self.reconnect = None;
        }
        debug!(options = ?self.options, "Connection options updated");
    }

    /// Explicit connect: resets the attempt counter and starts an attempt
    /// unless one is already running.
    pub(crate) fn connect(&mut self) -> Result<(), ClientError> {
        self.attempts = 0;
        self.reconnect = None;
        if self.is_connecting() {
            return Ok(());
        }
        self.start_attempt()
    }

    fn start_attempt(&mut self) -> Result<(), ClientError> {
        let Some(token) = self.credentials.credential() else {
            warn!("No credential available, not connecting");
            self.error = Some(ClientError::MissingCredential.to_string());
            self.publish_status();
            return Err(ClientError::MissingCredential);
        };

        info!(
            transport = self.transport.name(),
            endpoint = %self.transport.endpoint(),
            attempt = self.attempts,
            "Connecting"
        );

        let transport = Arc::clone(&self.transport);
        let timeout = self.options.timeout;
        self.attempt = Some(tokio::spawn(establish(transport, token, timeout)));
        Ok(())
    }

    /// Wait for the next transport-side event.
    ///
    /// Cancel safe. Pends forever when idle.
    pub(crate) async fn next_event(&mut self) -> ConnectionEvent {
        tokio::select! {
            biased;

            result = join_attempt(&mut self.attempt) => {
                self.attempt = None;
                ConnectionEvent::Attempt(self.finish_attempt(result))
            }

            received = recv_frame(&mut self.connection) => match received {
                Ok(Some(frame)) => {
                    metrics::record_frame("inbound");
                    ConnectionEvent::Frame(frame)
                }
                Ok(None) => ConnectionEvent::Lost("connection closed by server".into()),
                Err(e) => ConnectionEvent::Lost(e.to_string()),
            },

            () = wait_reconnect(&mut self.reconnect) => {
                self.reconnect = None;
                ConnectionEvent::ReconnectDue
            }

            () = tick_heartbeat(&mut self.heartbeat) => ConnectionEvent::HeartbeatDue,
        }
    }

    fn finish_attempt(
        &mut self,
        result: Result<Result<Session, ClientError>, tokio::task::JoinError>,
    ) -> Result<(), ClientError> {
        let outcome = result
            .map_err(|e| ClientError::Transport(format!("connection attempt aborted: {}", e)))
            .and_then(|r| r);

        match outcome {
            Ok(session) => {
                info!(connection = %session.connection_id, "Connected");
                self.connection = Some(session.connection);
                self.heartbeat = Some(self.heartbeat_timer());
                self.attempts = 0;
                self.last_connected = Some(now_millis());
                self.error = None;
                self.publish_status();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "Connection attempt failed");
                self.error = Some(e.to_string());
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Forget a lost connection and schedule a reconnect.
    pub(crate) fn mark_lost(&mut self, reason: &str) {
        if self.connection.take().is_none() {
            return;
        }
        warn!(reason, "Connection lost");
        self.heartbeat = None;
        self.error = Some(reason.to_string());
        self.schedule_reconnect();
    }

    /// Schedule the next reconnect, or give up once attempts are exhausted.
    fn schedule_reconnect(&mut self) {
        if !self.options.auto_reconnect {
            self.publish_status();
            return;
        }

        let next = self.attempts + 1;
        match self.options.reconnect_delay(next) {
            Some(delay) => {
                self.attempts = next;
                info!(attempt = next, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                metrics::record_reconnect_attempt();
                self.reconnect = Some(Box::pin(sleep(delay)));
            }
            None => {
                error!(attempts = self.attempts, "Reconnect attempts exhausted");
                self.error = Some(format!(
                    "Gave up after {} reconnect attempts",
                    self.attempts
                ));
            }
        }
        self.publish_status();
    }

    /// Start the attempt a fired reconnect timer asked for.
    pub(crate) fn reconnect_now(&mut self) {
        if self.is_connected() || self.is_connecting() {
            return;
        }
        // A missing credential stops the retry loop; it is already in the status.
        let _ = self.start_attempt();
    }

    /// Send a frame on the live connection.
    ///
    /// A failed send is treated as a lost connection.
    pub(crate) async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        let name = frame.name();
        match connection.send(frame).await {
            Ok(()) => {
                metrics::record_frame("outbound");
                debug!(frame = name, "Frame sent");
                Ok(())
            }
            Err(e) => {
                error!(frame = name, error = %e, "Failed to send frame");
                self.mark_lost(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Tear everything down and reset counters. No reconnect follows.
    pub(crate) async fn disconnect(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.reconnect = None;
        self.heartbeat = None;
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "Error while closing connection");
            }
            info!("Disconnected");
        }
        self.attempts = 0;
        self.error = None;
        self.publish_status();
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.is_connected(),
            last_connected: self.last_connected,
            error: self.error.clone(),
            reconnect_attempts: self.attempts,
        }
    }

    fn publish_status(&self) {
        metrics::set_connected(self.is_connected());
        self.store.set_status(self.status());
    }

    fn heartbeat_timer(&self) -> Interval {
        let period = self.options.heartbeat_interval.max(Duration::from_millis(1));
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }
}

async fn join_attempt(
    attempt: &mut Option<JoinHandle<Result<Session, ClientError>>>,
) -> Result<Result<Session, ClientError>, tokio::task::JoinError> {
    match attempt {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn recv_frame(
    connection: &mut Option<Box<dyn Connection>>,
) -> Result<Option<Frame>, dashpulse_transport::TransportError> {
    match connection {
        Some(connection) => connection.recv().await,
        None => pending().await,
    }
}

async fn wait_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn tick_heartbeat(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashpulse_transport::MemoryTransport;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let options = ConnectionOptions::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| options.reconnect_delay(n).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(options.reconnect_delay(6), None);
        assert_eq!(options.reconnect_delay(0), None);
    }

    #[test]
    fn test_options_update_is_partial() {
        let mut options = ConnectionOptions::default();
        ConnectionOptionsUpdate {
            max_attempts: Some(2),
            base_delay: Some(Duration::from_millis(250)),
            ..Default::default()
        }
        .apply_to(&mut options);

        assert_eq!(options.max_attempts, 2);
        assert_eq!(options.reconnect_delay(2), Some(Duration::from_millis(500)));
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert!(options.auto_reconnect);
    }

    #[test]
    fn test_credential_sources() {
        assert_eq!(StaticCredential::new("abc").credential().as_deref(), Some("abc"));
        assert_eq!(StaticCredential::new("").credential(), None);
        assert_eq!(
            EnvCredential::new("DASHPULSE_TEST_UNSET_TOKEN_VAR").credential(),
            None
        );

        let closure = || Some("from-session".to_string());
        assert_eq!(closure.credential().as_deref(), Some("from-session"));
    }

    #[tokio::test]
    async fn test_handshake_rejects_incompatible_version() {
        let (transport, mut listener) = MemoryTransport::pair();
        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let connect = conn.recv().await.unwrap().unwrap();
            assert_eq!(connect.name(), "connect");
            conn.send(Frame::connected("c-1", 0x20, 30_000)).await.unwrap();
            conn
        });

        let result = establish(Arc::new(transport), "t".into(), Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(ClientError::IncompatibleVersion { ref server }) if server == "2.0"
        ));
        let _ = server.await;
    }

    #[tokio::test]
    async fn test_handshake_surfaces_rejection() {
        let (transport, mut listener) = MemoryTransport::pair();
        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let _ = conn.recv().await;
            conn.send(Frame::DashboardError {
                error: "invalid token".into(),
                details: None,
            })
            .await
            .unwrap();
            conn
        });

        let result = establish(Arc::new(transport), "bad".into(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Rejected(ref e)) if e == "invalid token"));
        let _ = server.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out() {
        let (transport, mut listener) = MemoryTransport::pair();
        // Accept but never answer.
        let server = tokio::spawn(async move { listener.accept().await });

        let result = establish(Arc::new(transport), "t".into(), Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ClientError::Timeout(d)) if d == Duration::from_secs(10)));
        drop(server);
    }
}
