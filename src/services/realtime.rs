//! Realtime channel for generation-job updates.
//!
//! One WebSocket to `/api/generation-jobs/ws`, authenticated with a bearer
//! token fetched fresh for every connection attempt. Inbound JSON frames are
//! dispatched to handlers registered per message type or for all messages.
//!
//! # Reconnection
//!
//! Whenever the socket closes (cleanly or not) and auto-reconnect is on,
//! the next attempt waits `min(2^attempt * base, max)`. The attempt counter
//! resets once a connection opens. `disconnect()` clears the reconnect latch
//! and interrupts any pending wait, so a scheduled reconnect cannot revive
//! a client that was shut down.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::{Config, realtime_url};
use crate::error::{ForgeError, Result};
use crate::models::{MessageKind, RealtimeMessage};
use crate::services::auth::TokenProvider;
use crate::utils::backoff::{Backoff, ReconnectPolicy};

pub type Handler = Arc<dyn Fn(&RealtimeMessage) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// REST base URL; the socket URL is derived from it
    pub api_url: String,
    pub policy: ReconnectPolicy,
    pub auto_reconnect: bool,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Stop retrying when the token provider reports an auth failure
    pub stop_on_auth_failure: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            policy: ReconnectPolicy::default(),
            auto_reconnect: true,
            ping_interval: Duration::from_secs(30),
            stop_on_auth_failure: false,
        }
    }
}

impl From<&Config> for RealtimeConfig {
    fn from(config: &Config) -> Self {
        Self {
            api_url: config.api_url.clone(),
            policy: ReconnectPolicy::new(config.reconnect_base, config.reconnect_max),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Last connection error, cleared once a connection opens
    pub error: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            error: None,
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    typed: HashMap<MessageKind, Vec<(u64, Handler)>>,
    all: Vec<(u64, Handler)>,
}

/// Handlers keyed by message type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl HandlerRegistry {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, kind: MessageKind, handler: Handler) -> Subscription {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.typed.entry(kind).or_default().push((id, handler));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            id,
            kind: Some(kind),
        }
    }

    pub fn subscribe_all(&self, handler: Handler) -> Subscription {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.all.push((id, handler));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            id,
            kind: None,
        }
    }

    pub fn handler_count(&self) -> usize {
        let registry = self.lock();
        registry.all.len() + registry.typed.values().map(Vec::len).sum::<usize>()
    }

    /// Parses one text frame and dispatches it. Never fails.
    pub fn dispatch_text(&self, text: &str) {
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse realtime frame: {}", e);
                return;
            }
        };

        match serde_json::from_value::<RealtimeMessage>(value) {
            Ok(message) => self.dispatch(&message),
            Err(e) => debug!("Ignoring unrecognized realtime frame: {}", e),
        }
    }

    pub fn dispatch(&self, message: &RealtimeMessage) {
        // Copy handlers out so they can (un)subscribe without deadlocking
        let handlers: Vec<Handler> = {
            let registry = self.lock();
            registry
                .typed
                .get(&message.kind())
                .into_iter()
                .flatten()
                .chain(registry.all.iter())
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                warn!(kind = %message.kind(), "Realtime handler panicked");
            }
        }
    }
}

/// Keeps a handler registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
    kind: Option<MessageKind>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.id;
        match self.kind {
            Some(kind) => {
                if let Some(handlers) = registry.typed.get_mut(&kind) {
                    handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            }
            None => registry.all.retain(|(handler_id, _)| *handler_id != id),
        }
    }
}

struct Inner {
    config: RealtimeConfig,
    tokens: Arc<dyn TokenProvider>,
    handlers: HandlerRegistry,
    state: watch::Sender<ConnectionState>,
    should_reconnect: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn set_status(&self, status: ConnectionStatus) {
        self.state.send_modify(|state| state.status = status);
    }

    fn set_error(&self, message: String) {
        self.state.send_modify(|state| {
            state.status = ConnectionStatus::Error;
            state.error = Some(message);
        });
    }
}

/// Client for the generation-jobs WebSocket.
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());

        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                handlers: HandlerRegistry::default(),
                state,
                should_reconnect: AtomicBool::new(false),
                shutdown: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> Subscription
    where
        F: Fn(&RealtimeMessage) + Send + Sync + 'static,
    {
        self.inner.handlers.subscribe(kind, Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RealtimeMessage) + Send + Sync + 'static,
    {
        self.inner.handlers.subscribe_all(Arc::new(handler))
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().status == ConnectionStatus::Connected
    }

    /// Starts the connection loop in the background. A no-op while the
    /// loop is already running.
    pub fn connect(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Realtime client already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);
        self.inner.should_reconnect.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run(inner, shutdown_rx)));
    }

    /// Closes the socket and stops reconnecting. Waits for the loop to exit.
    pub async fn disconnect(&self) {
        self.signal_shutdown();

        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Realtime task ended abnormally: {}", e);
            }
        }
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    fn signal_shutdown(&self) {
        self.inner.should_reconnect.store(false, Ordering::SeqCst);
        let sender = self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

async fn run(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(inner.config.policy);

    loop {
        if !inner.should_reconnect.load(Ordering::SeqCst) {
            break;
        }

        inner.set_status(ConnectionStatus::Connecting);
        match connect_and_listen(&inner, &mut backoff, &mut shutdown_rx).await {
            Ok(()) => inner.set_status(ConnectionStatus::Disconnected),
            Err(e) => {
                let auth_failure = e.is_auth();
                let message = if auth_failure {
                    format!("Authentication failed: {e}")
                } else {
                    format!("Connection failed: {e}")
                };
                error!("{}", message);
                inner.set_error(message);

                if auth_failure && inner.config.stop_on_auth_failure {
                    inner.should_reconnect.store(false, Ordering::SeqCst);
                }
            }
        }

        if !inner.config.auto_reconnect || !inner.should_reconnect.load(Ordering::SeqCst) {
            break;
        }

        let delay = backoff.next_delay();
        info!(
            attempt = backoff.attempt(),
            "Reconnecting in {:?}", delay
        );
        inner.set_status(ConnectionStatus::Reconnecting {
            attempt: backoff.attempt(),
            delay,
        });

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                info!("Shutdown received during reconnect wait");
                break;
            }
        }
    }

    inner.set_status(ConnectionStatus::Disconnected);
    info!("Realtime client stopped");
}

/// One connection lifetime. `Ok` when the socket closed or shutdown was
/// requested, including during the handshake.
async fn connect_and_listen(
    inner: &Inner,
    backoff: &mut Backoff,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let connecting = async {
        let token = inner.tokens.access_token().await?;
        let url = realtime_url(&inner.config.api_url, &token)?;
        Ok::<_, ForgeError>(connect_async(url.as_str()).await?)
    };

    let (ws_stream, _) = tokio::select! {
        result = connecting => result?,
        _ = shutdown_rx.changed() => {
            info!("Shutdown received while connecting");
            return Ok(());
        }
    };

    backoff.reset();
    inner.state.send_modify(|state| {
        state.status = ConnectionStatus::Connected;
        state.error = None;
    });
    info!("Connected to realtime channel");

    let (mut write, mut read) = ws_stream.split();
    let mut ping_interval = tokio::time::interval(inner.config.ping_interval);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("Closing realtime connection");
                let _ = write.close().await;
                return Ok(());
            }

            _ = ping_interval.tick() => {
                write.send(Message::Ping(Vec::new())).await?;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => inner.handlers.dispatch_text(&text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => inner.handlers.dispatch_text(text),
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(
                            code = frame.as_ref().map(|f| u16::from(f.code)),
                            "Realtime channel closed by server"
                        );
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ForgeError::from(e)),
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&RealtimeMessage) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move |_: &RealtimeMessage| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn progress_frame(job_id: Uuid) -> String {
        serde_json::json!({
            "type": "job_progress",
            "job_id": job_id,
            "progress": 10.0
        })
        .to_string()
    }

    #[test]
    fn test_typed_and_catch_all_dispatch() {
        let registry = HandlerRegistry::default();
        let (typed, typed_handler) = counter();
        let (all, all_handler) = counter();

        let _progress = registry.subscribe(MessageKind::JobProgress, Arc::new(typed_handler));
        let _all = registry.subscribe_all(Arc::new(all_handler));

        registry.dispatch_text(&progress_frame(Uuid::new_v4()));
        registry.dispatch_text(r#"{"type":"heartbeat"}"#);

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let registry = HandlerRegistry::default();
        let (count, handler) = counter();

        let subscription = registry.subscribe(MessageKind::JobProgress, Arc::new(handler));
        registry.dispatch_text(&progress_frame(Uuid::new_v4()));
        subscription.unsubscribe();
        registry.dispatch_text(&progress_frame(Uuid::new_v4()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count(), 0);
    }

    #[test]
    fn test_bad_frames_and_panics_are_contained() {
        let registry = HandlerRegistry::default();
        let (count, handler) = counter();

        let _panicky = registry.subscribe(
            MessageKind::JobProgress,
            Arc::new(|_: &RealtimeMessage| panic!("handler bug")),
        );
        let _counting = registry.subscribe(MessageKind::JobProgress, Arc::new(handler));

        registry.dispatch_text("not json");
        registry.dispatch_text(r#"{"type":"unknown_kind"}"#);
        registry.dispatch_text(&progress_frame(Uuid::new_v4()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_can_unsubscribe_itself() {
        let registry = HandlerRegistry::default();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_in_handler = slot.clone();
        let subscription = registry.subscribe(
            MessageKind::Heartbeat,
            Arc::new(move |_: &RealtimeMessage| {
                slot_in_handler.lock().unwrap().take();
            }),
        );
        *slot.lock().unwrap() = Some(subscription);

        registry.dispatch_text(r#"{"type":"heartbeat"}"#);
        assert_eq!(registry.handler_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let registry = HandlerRegistry::default();
        let (_, handler) = counter();
        let subscription = registry.subscribe_all(Arc::new(handler));
        drop(registry);
        drop(subscription);
    }

    #[tokio::test]
    async fn test_auth_failure_reported_distinctly() {
        let config = RealtimeConfig {
            stop_on_auth_failure: true,
            ..Default::default()
        };
        let client = RealtimeClient::new(
            config,
            Arc::new(crate::services::auth::StaticToken(String::new())),
        );
        let mut state = client.watch_state();

        client.connect();
        let failed = state
            .wait_for(|s| s.status == ConnectionStatus::Error || s.error.is_some())
            .await
            .unwrap()
            .clone();
        assert!(failed.error.unwrap().starts_with("Authentication failed"));

        client.disconnect().await;
        assert_eq!(client.state().status, ConnectionStatus::Disconnected);
    }
}
