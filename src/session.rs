//! Ownership of the single automation session.
//!
//! The [`SessionManager`] is the only place that constructs or tears down a
//! client handle. Everyone else asks it for the ready client through
//! [`SessionManager::client`] once per unit of work.
//!
//! Each constructed handle gets a generation number. Its lifecycle signals are
//! consumed by a pump task tagged with that generation; when the handle is
//! retired the pump is aborted and any straggling signal carrying an old
//! generation is dropped, so a logout can never trigger a second re-init.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::collaborator::{AutomationClient, ClientFactory, CollaboratorEvent};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::state::{SessionPhase, SessionState};
use crate::types::{LifecycleEvent, ProfileInfo};

const LOGOUT_REASON: &str = "LOGOUT";
const SHUTDOWN_REASON: &str = "SHUTDOWN";

struct SessionInner {
    client: Option<Arc<dyn AutomationClient>>,
    pump: Option<JoinHandle<()>>,
}

/// A handle taken out of service, waiting to be torn down.
struct Retired {
    client: Option<Arc<dyn AutomationClient>>,
    was_ready: bool,
    generation: u64,
}

pub struct SessionManager {
    config: GatewayConfig,
    factory: Arc<dyn ClientFactory>,
    inner: RwLock<SessionInner>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<LifecycleEvent>,
    shutting_down: AtomicBool,
    reinit_pending: AtomicBool,
    this: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(config: GatewayConfig, factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(SessionState::default());
        Arc::new_cyclic(|this| Self {
            config,
            factory,
            inner: RwLock::new(SessionInner {
                client: None,
                pump: None,
            }),
            state,
            events,
            shutting_down: AtomicBool::new(false),
            reinit_pending: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Brings up the first session. A failure here is logged and left alone;
    /// restarting the process (or calling `logout`) is the way out.
    pub async fn start(&self) -> GatewayResult<()> {
        self.bring_up().await.map_err(|err| {
            error!("initial WhatsApp initialization failed: {err}");
            err
        })
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    pub fn is_initializing(&self) -> bool {
        self.state.borrow().initializing
    }

    pub fn current_qr(&self) -> Option<String> {
        self.state.borrow().qr().map(str::to_string)
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state replacement.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Subscribes to lifecycle events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Runs `handler` for every lifecycle event, in emission order.
    pub fn on_lifecycle_event<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(LifecycleEvent) + Send + 'static,
    {
        let mut receiver = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("lifecycle subscriber lagged, {missed} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// The client handle, provided the session is ready.
    pub async fn client(&self) -> GatewayResult<Arc<dyn AutomationClient>> {
        let inner = self.inner.read().await;
        match (&inner.client, self.is_ready()) {
            (Some(client), true) => Ok(client.clone()),
            _ => Err(GatewayError::NotConnected),
        }
    }

    /// Profile of the logged-in account, if it can be fetched.
    pub async fn profile(&self) -> Option<ProfileInfo> {
        let client = self.client().await.ok()?;
        match client.profile().await {
            Ok(info) => Some(info),
            Err(err) => {
                warn!("could not fetch profile info: {err}");
                None
            }
        }
    }

    /// Ends the current session and schedules a fresh one.
    ///
    /// Teardown failures are logged and never prevent the re-initialization.
    /// Calling this while a teardown or re-initialization is already under way
    /// is a no-op.
    pub async fn logout(&self) -> GatewayResult<()> {
        info!("initiating WhatsApp logout");
        let Some(retired) = self.retire(LOGOUT_REASON).await else {
            if self.reinit_pending.swap(true, Ordering::SeqCst) {
                info!("logout requested while a re-initialization is already pending");
            } else {
                // Disconnected with nothing pending: the last construction failed.
                self.schedule_reinit(self.snapshot().generation);
            }
            return Ok(());
        };

        self.teardown(&retired).await;
        info!("re-initializing WhatsApp client for new session");
        self.schedule_reinit(retired.generation);
        Ok(())
    }

    /// Tears the session down for good; no re-initialization follows.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(retired) = self.retire(SHUTDOWN_REASON).await {
            self.teardown(&retired).await;
        }
    }

    async fn bring_up(&self) -> GatewayResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("skipping session construction during shutdown");
            return Ok(());
        }

        let (client, generation) = {
            let mut inner = self.inner.write().await;
            let current = self.snapshot();
            let next = match &current.phase {
                SessionPhase::Uninitialized if inner.client.is_none() => {
                    SessionState::for_generation(current.generation + 1)
                }
                SessionPhase::Disconnected(_) => {
                    let mut next = current
                        .transition(SessionPhase::Uninitialized, true)
                        .map_err(|t| {
                            GatewayError::Collaborator(format!("{} -> {}", t.from, t.to))
                        })?;
                    next.generation += 1;
                    next
                }
                other => {
                    return Err(GatewayError::Collaborator(format!(
                        "session already active ({})",
                        other.name()
                    )));
                }
            };
            // Constructed only once the slot is known to be free.
            let handle = self.factory.create(&self.config).map_err(|err| {
                GatewayError::Collaborator(format!("could not construct client: {err}"))
            })?;
            let generation = next.generation;
            let client = handle.client.clone();
            inner.client = Some(handle.client);
            inner.pump = Some(self.spawn_pump(generation, handle.events));
            self.state.send_replace(next);
            (client, generation)
        };

        info!("initializing WhatsApp client (session {generation})");
        if let Err(err) = client.initialize().await {
            error!("WhatsApp initialization failed (session {generation}): {err}");
            let inner = self.inner.write().await;
            let current = self.snapshot();
            if current.generation == generation {
                self.state.send_replace(current.with_initializing(false));
            }
            drop(inner);
            return Err(err.into());
        }
        Ok(())
    }

    fn spawn_pump(
        &self,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<CollaboratorEvent>,
    ) -> JoinHandle<()> {
        let manager = self.this.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.handle_event(generation, event).await {
                    break;
                }
            }
            debug!("event pump for session {generation} stopped");
        })
    }

    /// Applies one collaborator signal. Returns `false` once the handle that
    /// produced it is no longer current.
    async fn handle_event(&self, generation: u64, event: CollaboratorEvent) -> bool {
        let inner = self.inner.write().await;
        let current = self.snapshot();
        if current.generation != generation {
            debug!("dropping event from retired session {generation}");
            return false;
        }

        match event {
            CollaboratorEvent::Qr(qr) => {
                info!("QR code received");
                self.replace_phase(&current, SessionPhase::Pairing(qr.clone()), true);
                self.emit(LifecycleEvent::QrIssued(qr));
            }
            CollaboratorEvent::Authenticated => {
                info!("WhatsApp authenticated");
                self.emit(LifecycleEvent::Authenticated);
            }
            CollaboratorEvent::AuthFailure(reason) => {
                error!("authentication failed: {reason}");
                self.state.send_replace(current.with_initializing(false));
                self.emit(LifecycleEvent::AuthFailed(reason));
            }
            CollaboratorEvent::Ready => {
                if self.replace_phase(&current, SessionPhase::Ready, false) {
                    info!("WhatsApp client ready");
                    self.emit(LifecycleEvent::Ready);
                    self.log_profile();
                }
            }
            CollaboratorEvent::Loading { percent, message } => {
                info!("WhatsApp loading: {percent}% {message}");
                self.state.send_replace(current.with_initializing(true));
            }
            CollaboratorEvent::Message(message) => {
                self.emit(LifecycleEvent::InboundMessage(message));
            }
            CollaboratorEvent::Disconnected(reason) => {
                warn!("WhatsApp disconnected: {reason}");
                drop(inner);
                self.recover(reason).await;
                return false;
            }
            CollaboratorEvent::Error(message) => {
                if self.config.is_unrecoverable(&message) {
                    error!("unrecoverable WhatsApp client error: {message}");
                    drop(inner);
                    self.recover(message).await;
                    return false;
                }
                error!("WhatsApp client error: {message}");
            }
        }
        true
    }

    /// Retires the current handle after an unexpected loss and schedules the
    /// teardown/re-init cycle off the pump task.
    async fn recover(&self, reason: String) {
        let Some(retired) = self.retire(&reason).await else {
            return;
        };
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            manager.teardown(&retired).await;
            manager.reinit_after_quiescence(retired.generation).await;
        });
    }

    /// Swaps the current handle out and moves to `Disconnected`, detaching its
    /// event pump first. `None` when there is nothing to retire, i.e. a
    /// teardown is already under way.
    ///
    /// Unless shutting down, the re-initialization counts as pending from the
    /// moment the handle is retired until the next construction finishes.
    async fn retire(&self, reason: &str) -> Option<Retired> {
        let mut inner = self.inner.write().await;
        let current = self.snapshot();
        let next = match current.transition(SessionPhase::Disconnected(reason.to_string()), false)
        {
            Ok(next) => next,
            Err(rejected) => {
                debug!(
                    "not retiring session {}: {} -> {}",
                    current.generation, rejected.from, rejected.to
                );
                return None;
            }
        };

        if !self.shutting_down.load(Ordering::SeqCst) {
            self.reinit_pending.store(true, Ordering::SeqCst);
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        let retired = Retired {
            client: inner.client.take(),
            was_ready: current.is_ready(),
            generation: current.generation,
        };
        self.state.send_replace(next);
        self.emit(LifecycleEvent::Disconnected(reason.to_string()));
        Some(retired)
    }

    async fn teardown(&self, retired: &Retired) {
        let Some(client) = &retired.client else {
            return;
        };
        let result = if retired.was_ready {
            client.logout().await.map(|_| "logged out")
        } else {
            client.destroy().await.map(|_| "client destroyed")
        };
        match result {
            Ok(what) => info!("session {}: {what}", retired.generation),
            Err(err) => error!("error tearing down session {}: {err}", retired.generation),
        }
    }

    fn schedule_reinit(&self, generation: u64) {
        let Some(manager) = self.this.upgrade() else {
            self.reinit_pending.store(false, Ordering::SeqCst);
            return;
        };
        tokio::spawn(async move {
            manager.reinit_after_quiescence(generation).await;
        });
    }

    async fn reinit_after_quiescence(&self, retired_generation: u64) {
        tokio::time::sleep(self.config.quiescence_delay()).await;
        let result = self.bring_up().await;
        self.reinit_pending.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            error!("error re-initializing WhatsApp after session {retired_generation}: {err}");
        }
    }

    /// Replaces the phase if the edge is allowed; logs and ignores otherwise.
    fn replace_phase(&self, current: &SessionState, next: SessionPhase, initializing: bool) -> bool {
        match current.transition(next, initializing) {
            Ok(next) => {
                self.state.send_replace(next);
                true
            }
            Err(rejected) => {
                warn!(
                    "ignoring lifecycle transition {} -> {}",
                    rejected.from, rejected.to
                );
                false
            }
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine; delivery is best-effort.
        let _ = self.events.send(event);
    }

    fn log_profile(&self) {
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Some(info) = manager.profile().await {
                info!(
                    "WhatsApp profile: name={} number={} platform={}",
                    info.push_name.as_deref().unwrap_or("Not set"),
                    info.number,
                    info.platform
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::memory::MemoryClientFactory;
    use std::time::Duration;

    fn manager_with(factory: &Arc<MemoryClientFactory>) -> Arc<SessionManager> {
        SessionManager::new(GatewayConfig::default(), factory.clone())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_then_ready() {
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        assert!(!manager.is_ready());
        assert!(manager.is_initializing());
        let qr = manager.current_qr().expect("qr issued");
        assert!(!qr.is_empty());

        factory.latest().unwrap().scan();
        settle().await;
        assert!(manager.is_ready());
        assert!(!manager.is_initializing());
        assert_eq!(manager.current_qr(), None);
        assert!(manager.client().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn client_is_refused_until_ready() {
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = manager_with(&factory);
        assert!(matches!(
            manager.client().await,
            Err(GatewayError::NotConnected)
        ));
        manager.start().await.unwrap();
        settle().await;
        assert!(matches!(
            manager.client().await,
            Err(GatewayError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn startup_failure_is_not_retried() {
        let factory = Arc::new(MemoryClientFactory::new());
        factory.fail_next_initialize("browser failed to launch");
        let manager = manager_with(&factory);

        assert!(manager.start().await.is_err());
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(factory.handles_created(), 1);
        assert!(!manager.is_initializing());
        assert!(!manager.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_disconnect_recovers_with_new_handle() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        let manager = manager_with(&factory);
        let mut events = manager.subscribe();
        manager.start().await.unwrap();
        settle().await;
        assert!(manager.is_ready());

        let first = factory.latest().unwrap();
        first.emit(CollaboratorEvent::Disconnected("NAVIGATION".into()));
        settle().await;
        assert_eq!(
            manager.snapshot().phase,
            SessionPhase::Disconnected("NAVIGATION".into())
        );
        assert!(matches!(
            manager.client().await,
            Err(GatewayError::NotConnected)
        ));

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        settle().await;
        assert_eq!(factory.handles_created(), 2);
        // It was ready, so the old handle is logged out, which unlinks it.
        assert_eq!(first.logout_calls(), 1);
        assert_eq!(manager.snapshot().phase.name(), "pairing");
        assert!(manager.current_qr().is_some());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&LifecycleEvent::Disconnected("NAVIGATION".into())));
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, LifecycleEvent::Ready))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_closed_error_triggers_recovery() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        factory
            .latest()
            .unwrap()
            .emit(CollaboratorEvent::Error("Protocol error: Session closed.".into()));
        settle().await;
        assert!(!manager.is_ready());
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(factory.handles_created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn benign_error_keeps_session() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        factory
            .latest()
            .unwrap()
            .emit(CollaboratorEvent::Error("Evaluation failed".into()));
        settle().await;
        assert!(manager.is_ready());
        assert_eq!(factory.handles_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_while_pairing_destroys_instead_of_logging_out() {
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        let first = factory.latest().unwrap();
        manager.logout().await.unwrap();
        assert_eq!(first.logout_calls(), 0);
        assert_eq!(first.destroy_calls(), 1);
        assert_eq!(
            manager.snapshot().phase,
            SessionPhase::Disconnected(LOGOUT_REASON.into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_logout_during_quiescence_is_a_no_op() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        manager.logout().await.unwrap();
        manager.logout().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(factory.handles_created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_logouts_reinitialize_once() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        factory.slow_teardown(Duration::from_millis(500));
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;
        let first = factory.latest().unwrap();

        let (a, b) = tokio::join!(manager.logout(), manager.logout());
        assert!(a.is_ok() && b.is_ok());
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(factory.handles_created(), 2);
        assert_eq!(first.logout_calls(), 1);
        assert!(manager.current_qr().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_recovery_teardown_is_a_no_op() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        factory.slow_teardown(Duration::from_millis(500));
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        factory
            .latest()
            .unwrap()
            .emit(CollaboratorEvent::Disconnected("NAVIGATION".into()));
        settle().await;
        manager.logout().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(factory.handles_created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_builds_no_extra_handle() {
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        assert!(manager.start().await.is_err());
        assert_eq!(factory.handles_created(), 1);
        assert!(manager.current_qr().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_clears_initializing_only() {
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = manager_with(&factory);
        let mut events = manager.subscribe();
        manager.start().await.unwrap();
        settle().await;

        factory
            .latest()
            .unwrap()
            .emit(CollaboratorEvent::AuthFailure("bad credentials".into()));
        settle().await;
        assert!(!manager.is_initializing());
        assert_eq!(manager.snapshot().phase.name(), "pairing");

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= event == LifecycleEvent::AuthFailed("bad credentials".into());
        }
        assert!(failed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_does_not_reinitialize() {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        let manager = manager_with(&factory);
        manager.start().await.unwrap();
        settle().await;

        manager.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(factory.handles_created(), 1);
        assert!(!manager.is_ready());
    }
}
