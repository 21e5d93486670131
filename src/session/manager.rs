//! Session manager actor
//!
//! All transitions happen inside one task that drains a command queue. Provider
//! events, connect completions, timers and operator requests are all commands,
//! so the state machine never needs a lock of its own. Readers see the current
//! state through a `watch` channel, which is also where `send` captures the
//! provider handle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::{LifecycleEvent, ResetOutcome, SessionState, SessionStatus, StoreCleaner};
use crate::channels::whatsapp::{LOGOUT_REASON, UNPAIRED_STATES};
use crate::channels::{Payload, Provider, ProviderEvent, ProviderSession};
use crate::config::SessionConfig;
use crate::contacts::{RawContact, RecipientAddress};
use crate::error::{MessengerError, Result};

const EVENT_CAPACITY: usize = 64;

/// Disconnect reasons meaning the account itself unlinked this device.
const UNLINK_REASONS: [&str; 2] = [LOGOUT_REASON, "UNPAIRED"];

type ResetReply = oneshot::Sender<Result<ResetOutcome>>;

#[derive(Clone)]
struct Shared {
    state: SessionState,
    pairing_code: Option<String>,
    resetting: bool,
    /// Present only while `state` is `Ready`
    handle: Option<Arc<dyn ProviderSession>>,
}

enum Command {
    Start,
    Connected {
        generation: u64,
        result: Result<Arc<dyn ProviderSession>>,
        events: mpsc::UnboundedReceiver<ProviderEvent>,
    },
    Provider {
        generation: u64,
        event: ProviderEvent,
    },
    Reset {
        plan: ResetPlan,
        reply: ResetReply,
    },
    AutoReset {
        generation: u64,
        wipe: bool,
    },
    ResetFinished {
        cleaned: bool,
        reply: Option<ResetReply>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy)]
struct ResetPlan {
    logout: bool,
    wipe: bool,
}

/// Handle to the session actor. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
    shared: watch::Receiver<Shared>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl SessionManager {
    /// Spawn the actor. The session stays `Uninitialized` until [`start`](Self::start).
    pub fn spawn(
        provider: Arc<dyn Provider>,
        cleaner: StoreCleaner,
        config: SessionConfig,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (shared_tx, shared) = watch::channel(Shared {
            state: SessionState::Uninitialized,
            pairing_code: None,
            resetting: false,
            handle: None,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let manager = Self {
            commands: commands.clone(),
            shared,
            events: events.clone(),
        };

        let actor = Actor {
            provider,
            cleaner,
            config,
            commands: commands.downgrade(),
            shared: shared_tx,
            events,
            generation: 0,
            handle: None,
            connecting: false,
            resetting: false,
            pending_wipe: false,
            auto_resets: 0,
        };
        let task = tokio::spawn(actor.run(rx));

        (manager, task)
    }

    /// Construct the provider handle and begin pairing.
    pub fn start(&self) -> Result<()> {
        self.commands
            .send(Command::Start)
            .map_err(|_| MessengerError::ManagerStopped)
    }

    pub fn current_state(&self) -> SessionState {
        self.shared.borrow().state
    }

    pub fn current_pairing_code(&self) -> Option<String> {
        self.shared.borrow().pairing_code.clone()
    }

    pub fn is_usable(&self) -> bool {
        self.current_state().is_usable()
    }

    pub fn status(&self) -> SessionStatus {
        let shared = self.shared.borrow();
        SessionStatus {
            state: shared.state,
            pairing_code: shared.pairing_code.clone(),
            ready: shared.state.is_usable(),
            resetting: shared.resetting,
        }
    }

    /// Lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Wait until the session reaches `state`, up to `timeout`.
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let mut rx = self.shared.clone();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| s.state == state)).await,
            Ok(Ok(_))
        )
    }

    fn ready_handle(&self) -> Result<Arc<dyn ProviderSession>> {
        let shared = self.shared.borrow();
        match (&shared.handle, shared.state) {
            (Some(handle), SessionState::Ready) => Ok(Arc::clone(handle)),
            (_, SessionState::AwaitingPairing) => Err(MessengerError::PairingRequired),
            (_, state) => Err(MessengerError::SessionUnavailable {
                state: state.to_string(),
            }),
        }
    }

    /// Send one message. Fails fast unless the session is `Ready`.
    pub async fn send(&self, to: &RecipientAddress, payload: &Payload) -> Result<()> {
        let handle = self.ready_handle().map_err(|e| match e {
            // Sends report the state, not the pairing hint
            MessengerError::PairingRequired => MessengerError::SessionUnavailable {
                state: SessionState::AwaitingPairing.to_string(),
            },
            other => other,
        })?;
        handle.send(to, payload).await
    }

    /// Raw address book of the paired account.
    pub async fn contacts(&self) -> Result<Vec<RawContact>> {
        let handle = self.ready_handle()?;
        handle.contacts().await
    }

    /// Unlink the device (best effort), then reset with a clean store.
    pub async fn logout(&self) -> Result<ResetOutcome> {
        self.request_reset(ResetPlan { logout: true, wipe: true }).await
    }

    /// Reset with a clean store, skipping the graceful logout.
    pub async fn force_reset(&self) -> Result<ResetOutcome> {
        self.request_reset(ResetPlan { logout: false, wipe: true }).await
    }

    /// Rebuild the provider handle over the existing store. An unpaired device
    /// gets a fresh pairing code; a paired one reconnects.
    pub async fn refresh_pairing(&self) -> Result<ResetOutcome> {
        self.request_reset(ResetPlan { logout: false, wipe: false }).await
    }

    async fn request_reset(&self, plan: ResetPlan) -> Result<ResetOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Reset { plan, reply })
            .map_err(|_| MessengerError::ManagerStopped)?;
        rx.await.map_err(|_| MessengerError::ManagerStopped)?
    }

    /// Tear the handle down without touching the store and stop the actor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Actor {
    provider: Arc<dyn Provider>,
    cleaner: StoreCleaner,
    config: SessionConfig,
    commands: mpsc::WeakUnboundedSender<Command>,
    shared: watch::Sender<Shared>,
    events: broadcast::Sender<LifecycleEvent>,
    /// Bumped for every new handle and every reset; older tags are stale
    generation: u64,
    handle: Option<Arc<dyn ProviderSession>>,
    connecting: bool,
    resetting: bool,
    /// Set once the current credentials are known bad; the next reset wipes
    pending_wipe: bool,
    auto_resets: u32,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Start => self.start(),
                Command::Connected {
                    generation,
                    result,
                    events,
                } => self.on_connected(generation, result, events),
                Command::Provider { generation, event } => {
                    if generation == self.generation {
                        self.on_provider_event(event);
                    } else {
                        tracing::debug!("Session: dropping stale event {:?}", event);
                    }
                }
                Command::Reset { plan, reply } => {
                    if self.resetting {
                        tracing::info!("Session: reset already in progress, ignoring request");
                        let _ = reply.send(Ok(ResetOutcome::AlreadyInProgress));
                    } else {
                        self.auto_resets = 0;
                        self.begin_reset(plan, Some(reply));
                    }
                }
                Command::AutoReset { generation, wipe } => self.on_auto_reset(generation, wipe),
                Command::ResetFinished { cleaned, reply } => self.on_reset_finished(cleaned, reply),
                Command::Shutdown { reply } => {
                    self.generation += 1;
                    if let Some(handle) = self.handle.take() {
                        if let Err(e) = handle.destroy().await {
                            tracing::warn!("Session: teardown on shutdown failed: {}", e);
                        }
                    }
                    self.publish(|s| {
                        s.state = SessionState::Uninitialized;
                        s.pairing_code = None;
                        s.handle = None;
                    });
                    tracing::info!("Session manager stopped");
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn publish(&self, modify: impl FnOnce(&mut Shared)) {
        self.shared.send_modify(modify);
    }

    fn state(&self) -> SessionState {
        self.shared.borrow().state
    }

    fn transition(&self, to: SessionState) {
        let from = self.state();
        if from != to {
            tracing::info!("Session: {} -> {}", from, to);
        }
        let handle = if to.is_usable() { self.handle.clone() } else { None };
        self.publish(|s| {
            s.state = to;
            s.handle = handle;
            if to != SessionState::AwaitingPairing {
                s.pairing_code = None;
            }
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn start(&mut self) {
        if self.state() != SessionState::Uninitialized || self.connecting || self.resetting {
            tracing::debug!("Session: start ignored in state {}", self.state());
            return;
        }

        self.generation += 1;
        self.connecting = true;
        self.transition(SessionState::AwaitingPairing);

        let generation = self.generation;
        let provider = Arc::clone(&self.provider);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let (tx, events) = mpsc::unbounded_channel();
            let result = provider.connect(tx).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Connected {
                    generation,
                    result,
                    events,
                });
            }
        });
    }

    fn on_connected(
        &mut self,
        generation: u64,
        result: Result<Arc<dyn ProviderSession>>,
        events: mpsc::UnboundedReceiver<ProviderEvent>,
    ) {
        if generation != self.generation {
            if let Ok(stale) = result {
                tracing::debug!("Session: destroying stale handle from generation {}", generation);
                tokio::spawn(async move {
                    let _ = stale.destroy().await;
                });
            }
            return;
        }
        self.connecting = false;

        match result {
            Ok(handle) => {
                tracing::info!("Session: provider handle constructed");
                self.handle = Some(handle);
                self.spawn_event_forwarder(generation, events);
            }
            Err(e) => {
                tracing::warn!("Session: failed to construct provider handle: {}", e);
                self.transition(SessionState::Disconnected);
                self.emit(LifecycleEvent::Disconnected {
                    reason: e.to_string(),
                });
                self.schedule_auto_reset(self.config.reconnect_delay(), false);
            }
        }
    }

    fn spawn_event_forwarder(
        &self,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ProviderEvent>,
    ) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(Command::Provider { generation, event }).is_err() {
                    break;
                }
            }
        });
    }

    fn on_provider_event(&mut self, event: ProviderEvent) {
        let state = self.state();
        match event {
            ProviderEvent::PairingCode(code) if state == SessionState::AwaitingPairing => {
                tracing::info!("Session: new pairing code available");
                self.publish(|s| s.pairing_code = Some(code.clone()));
                self.emit(LifecycleEvent::PairingCode { code });
            }
            ProviderEvent::Authenticated if state == SessionState::AwaitingPairing => {
                self.transition(SessionState::Authenticated);
                self.emit(LifecycleEvent::Authenticated);
            }
            ProviderEvent::Ready if state == SessionState::Authenticated => {
                self.auto_resets = 0;
                self.transition(SessionState::Ready);
                self.emit(LifecycleEvent::Ready);
            }
            ProviderEvent::Disconnected(reason)
                if matches!(
                    state,
                    SessionState::Ready | SessionState::Authenticated | SessionState::AwaitingPairing
                ) =>
            {
                let wipe = UNLINK_REASONS
                    .iter()
                    .any(|r| reason.eq_ignore_ascii_case(r));
                tracing::warn!("Session: disconnected ({}), wipe store: {}", reason, wipe);
                self.pending_wipe |= wipe;
                self.transition(SessionState::Disconnected);
                self.emit(LifecycleEvent::Disconnected { reason });
                self.schedule_auto_reset(self.config.reconnect_delay(), wipe);
            }
            ProviderEvent::AuthFailure(message) => self.on_auth_failure(message),
            ProviderEvent::StateChanged(provider_state)
                if UNPAIRED_STATES
                    .iter()
                    .any(|s| provider_state.eq_ignore_ascii_case(s)) =>
            {
                self.on_auth_failure(format!("session closed from phone ({})", provider_state));
            }
            other => {
                tracing::debug!("Session: ignoring {:?} in state {}", other, state);
            }
        }
    }

    fn on_auth_failure(&mut self, message: String) {
        tracing::warn!("Session: authentication failure: {}", message);
        self.pending_wipe = true;
        self.transition(SessionState::AuthFailed);
        self.emit(LifecycleEvent::AuthFailure { message });
        self.schedule_auto_reset(self.config.auth_failure_delay(), true);
    }

    fn schedule_auto_reset(&self, delay: Duration, wipe: bool) {
        let generation = self.generation;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::AutoReset { generation, wipe });
            }
        });
    }

    fn on_auto_reset(&mut self, generation: u64, wipe: bool) {
        let state = self.state();
        if generation != self.generation
            || self.resetting
            || !matches!(state, SessionState::Disconnected | SessionState::AuthFailed)
        {
            tracing::debug!("Session: stale automatic reset dropped");
            return;
        }

        if self.auto_resets >= self.config.max_auto_resets {
            tracing::error!(
                "Session: giving up after {} automatic reset(s); waiting for operator",
                self.auto_resets
            );
            self.emit(LifecycleEvent::RecoveryExhausted {
                attempts: self.auto_resets,
            });
            return;
        }

        self.auto_resets += 1;
        tracing::info!(
            "Session: automatic reset {}/{}",
            self.auto_resets,
            self.config.max_auto_resets
        );
        self.begin_reset(ResetPlan { logout: false, wipe }, None);
    }

    fn begin_reset(&mut self, mut plan: ResetPlan, reply: Option<ResetReply>) {
        if self.pending_wipe && !plan.wipe {
            tracing::info!("Session: credentials were rejected earlier, wiping store");
            plan.wipe = true;
        }
        self.pending_wipe = false;
        self.resetting = true;
        self.connecting = false;
        self.generation += 1;
        let handle = self.handle.take();
        self.transition(SessionState::Destroying);
        self.publish(|s| s.resetting = true);

        let cleaner = self.cleaner.clone();
        let store_dir = self.config.store_dir.clone();
        let grace = self.config.teardown_grace();
        let attempts = self.config.cleanup_attempts;
        let delay = self.config.cleanup_delay();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            if let Some(handle) = handle {
                if plan.logout {
                    if let Err(e) = handle.logout().await {
                        tracing::warn!("Session: graceful logout failed: {}", e);
                    }
                }
                if let Err(e) = handle.destroy().await {
                    tracing::warn!("Session: teardown failed: {}", e);
                }
            }

            // Let the automation driver release its file locks
            tokio::time::sleep(grace).await;

            let cleaned = if plan.wipe {
                cleaner.clean(&store_dir, attempts, delay).await
            } else {
                true
            };

            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::ResetFinished { cleaned, reply });
            }
        });
    }

    fn on_reset_finished(&mut self, cleaned: bool, reply: Option<ResetReply>) {
        self.resetting = false;
        self.publish(|s| s.resetting = false);
        self.transition(SessionState::Uninitialized);

        if cleaned {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(ResetOutcome::Completed));
            }
            self.start();
            return;
        }

        self.pending_wipe = true;
        let error = MessengerError::CleanupLocked {
            path: self.config.store_dir.display().to_string(),
            attempts: self.config.cleanup_attempts,
        };
        tracing::error!("Session: reset failed: {}", error);
        self.emit(LifecycleEvent::ResetFailed {
            message: error.to_string(),
        });
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MockProviderSession, ProviderEventSender};
    use crate::session::cleaner::MockDirRemover;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    type SessionFactory = Box<dyn Fn() -> Arc<dyn ProviderSession> + Send + Sync>;

    #[derive(Default)]
    struct FakeSession {
        sent: Mutex<Vec<String>>,
        logouts: AtomicUsize,
        destroys: AtomicUsize,
    }

    #[async_trait]
    impl ProviderSession for FakeSession {
        async fn send(&self, to: &RecipientAddress, payload: &Payload) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("{}:{}", to.digits(), payload.body()));
            Ok(())
        }

        async fn logout(&self) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn contacts(&self) -> Result<Vec<RawContact>> {
            Ok(vec![RawContact {
                name: Some("Ana".to_string()),
                number: "51974672423".to_string(),
                id: "51974672423@c.us".to_string(),
                is_my_contact: true,
                is_group: false,
            }])
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        connects: AtomicUsize,
        failing_connects: AtomicUsize,
        senders: Mutex<Vec<ProviderEventSender>>,
        sessions: Mutex<Vec<Arc<FakeSession>>>,
        factory: Option<SessionFactory>,
    }

    impl FakeProvider {
        fn with_factory(factory: SessionFactory) -> Self {
            Self {
                factory: Some(factory),
                ..Self::default()
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn session(&self, index: usize) -> Arc<FakeSession> {
            Arc::clone(&self.sessions.lock().unwrap()[index])
        }

        /// Push an event to the most recent handle.
        fn emit(&self, event: ProviderEvent) {
            let senders = self.senders.lock().unwrap();
            senders.last().expect("no handle yet").send(event).unwrap();
        }

        fn emit_to(&self, index: usize, event: ProviderEvent) {
            let senders = self.senders.lock().unwrap();
            let _ = senders[index].send(event);
        }

        async fn wait_for_connects(&self, n: usize) {
            tokio::time::timeout(WAIT, async {
                while self.senders.lock().unwrap().len() < n {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("provider never connected");
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn connect(&self, events: ProviderEventSender) -> Result<Arc<dyn ProviderSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_connects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MessengerError::Provider("connection refused".to_string()));
            }
            self.senders.lock().unwrap().push(events);
            if let Some(factory) = &self.factory {
                return Ok(factory());
            }
            let session = Arc::new(FakeSession::default());
            self.sessions.lock().unwrap().push(Arc::clone(&session));
            Ok(session)
        }
    }

    fn config(store: &TempDir) -> SessionConfig {
        SessionConfig {
            store_dir: store.path().join("session"),
            reconnect_delay_secs: 0,
            auth_failure_delay_secs: 0,
            teardown_grace_ms: 20,
            cleanup_attempts: 2,
            cleanup_delay_ms: 1,
            max_auto_resets: 3,
            print_qr: false,
        }
    }

    fn seed_store(store: &TempDir) -> PathBuf {
        let dir = store.path().join("session");
        std::fs::create_dir_all(dir.join("Default")).unwrap();
        std::fs::write(dir.join("Default/Cookies"), b"auth").unwrap();
        dir
    }

    async fn ready_manager(
        provider: Arc<FakeProvider>,
        config: SessionConfig,
    ) -> SessionManager {
        let (manager, _task) = SessionManager::spawn(provider.clone(), StoreCleaner::default(), config);
        manager.start().unwrap();
        provider.wait_for_connects(1).await;
        provider.emit(ProviderEvent::Authenticated);
        provider.emit(ProviderEvent::Ready);
        assert!(manager.wait_for_state(SessionState::Ready, WAIT).await);
        manager
    }

    fn ana() -> RecipientAddress {
        RecipientAddress::parse("51974672423").unwrap()
    }

    #[tokio::test]
    async fn test_pairing_flow_reaches_ready() {
        let store = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let (manager, _task) =
            SessionManager::spawn(provider.clone(), StoreCleaner::default(), config(&store));
        let mut events = manager.subscribe();
        assert_eq!(manager.current_state(), SessionState::Uninitialized);

        manager.start().unwrap();
        provider.wait_for_connects(1).await;
        assert_eq!(manager.current_state(), SessionState::AwaitingPairing);

        provider.emit(ProviderEvent::PairingCode("2@first".into()));
        provider.emit(ProviderEvent::PairingCode("2@second".into()));
        assert_eq!(
            events.recv().await.unwrap(),
            LifecycleEvent::PairingCode { code: "2@first".into() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            LifecycleEvent::PairingCode { code: "2@second".into() }
        );
        assert_eq!(manager.current_pairing_code().as_deref(), Some("2@second"));

        provider.emit(ProviderEvent::Authenticated);
        assert!(manager.wait_for_state(SessionState::Authenticated, WAIT).await);
        assert_eq!(manager.current_pairing_code(), None);
        assert!(!manager.is_usable());

        provider.emit(ProviderEvent::Ready);
        assert!(manager.wait_for_state(SessionState::Ready, WAIT).await);
        assert!(manager.is_usable());
        assert!(manager.status().ready);

        manager.send(&ana(), &Payload::text("hola")).await.unwrap();
        assert_eq!(*provider.session(0).sent.lock().unwrap(), vec!["51974672423:hola"]);
        assert_eq!(manager.contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_before_ready_makes_no_provider_call() {
        let store = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::with_factory(Box::new(|| {
            let mut session = MockProviderSession::new();
            session.expect_send().never();
            session.expect_contacts().never();
            session.expect_destroy().returning(|| Ok(()));
            Arc::new(session)
        })));
        let (manager, _task) =
            SessionManager::spawn(provider.clone(), StoreCleaner::default(), config(&store));

        let err = manager.send(&ana(), &Payload::text("x")).await.unwrap_err();
        assert!(matches!(err, MessengerError::SessionUnavailable { ref state } if state == "uninitialized"));

        manager.start().unwrap();
        provider.wait_for_connects(1).await;
        let err = manager.send(&ana(), &Payload::text("x")).await.unwrap_err();
        assert!(matches!(err, MessengerError::SessionUnavailable { ref state } if state == "awaiting_pairing"));
        assert!(matches!(
            manager.contacts().await.unwrap_err(),
            MessengerError::PairingRequired
        ));

        provider.emit(ProviderEvent::Authenticated);
        assert!(manager.wait_for_state(SessionState::Authenticated, WAIT).await);
        assert!(matches!(
            manager.send(&ana(), &Payload::text("x")).await.unwrap_err(),
            MessengerError::SessionUnavailable { .. }
        ));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_double_force_reset_runs_one_cycle() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let manager = ready_manager(provider.clone(), config(&store)).await;

        let (first, second) = tokio::join!(manager.force_reset(), manager.force_reset());
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| *o == ResetOutcome::AlreadyInProgress);
        assert_eq!(
            outcomes,
            vec![ResetOutcome::Completed, ResetOutcome::AlreadyInProgress]
        );

        provider.wait_for_connects(2).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);
        assert_eq!(provider.connects(), 2);

        let old = provider.session(0);
        assert_eq!(old.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(old.logouts.load(Ordering::SeqCst), 0);
        assert!(!store_dir.exists());
    }

    #[tokio::test]
    async fn test_logout_is_graceful_then_resets() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let manager = ready_manager(provider.clone(), config(&store)).await;

        assert_eq!(manager.logout().await.unwrap(), ResetOutcome::Completed);
        let old = provider.session(0);
        assert_eq!(old.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(old.destroys.load(Ordering::SeqCst), 1);
        assert!(!store_dir.exists());

        provider.wait_for_connects(2).await;
        assert!(!manager.is_usable());
    }

    #[tokio::test]
    async fn test_benign_disconnect_preserves_store_and_reconnects() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let manager = ready_manager(provider.clone(), config(&store)).await;
        let mut events = manager.subscribe();

        provider.emit(ProviderEvent::Disconnected("NAVIGATION".into()));
        assert_eq!(
            events.recv().await.unwrap(),
            LifecycleEvent::Disconnected { reason: "NAVIGATION".into() }
        );
        assert!(matches!(
            manager.send(&ana(), &Payload::text("x")).await,
            Err(MessengerError::SessionUnavailable { .. })
        ));

        provider.wait_for_connects(2).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);
        assert!(store_dir.exists());
        assert_eq!(provider.session(0).destroys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_wipes_store() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let (manager, _task) =
            SessionManager::spawn(provider.clone(), StoreCleaner::default(), config(&store));
        manager.start().unwrap();
        provider.wait_for_connects(1).await;

        provider.emit(ProviderEvent::AuthFailure("restore failed".into()));
        provider.wait_for_connects(2).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);
        assert!(!store_dir.exists());
    }

    #[tokio::test]
    async fn test_auth_failure_after_benign_disconnect_still_wipes() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let mut cfg = config(&store);
        cfg.auth_failure_delay_secs = 1;
        let manager = ready_manager(provider.clone(), cfg).await;
        let mut events = manager.subscribe();

        // The non-wiping reconnect fires first; the rejection must still count
        provider.emit(ProviderEvent::Disconnected("NAVIGATION".into()));
        provider.emit(ProviderEvent::AuthFailure("credentials rejected".into()));
        assert!(matches!(events.recv().await.unwrap(), LifecycleEvent::Disconnected { .. }));
        assert!(matches!(events.recv().await.unwrap(), LifecycleEvent::AuthFailure { .. }));

        provider.wait_for_connects(2).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);
        assert!(!store_dir.exists());
    }

    #[tokio::test]
    async fn test_refresh_pairing_keeps_store() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let (manager, _task) =
            SessionManager::spawn(provider.clone(), StoreCleaner::default(), config(&store));
        manager.start().unwrap();
        provider.wait_for_connects(1).await;
        provider.emit(ProviderEvent::PairingCode("2@stale".into()));

        assert_eq!(manager.refresh_pairing().await.unwrap(), ResetOutcome::Completed);
        provider.wait_for_connects(2).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);
        assert_eq!(manager.current_pairing_code(), None);

        let old = provider.session(0);
        assert_eq!(old.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(old.logouts.load(Ordering::SeqCst), 0);
        assert!(store_dir.join("Default/Cookies").exists());
    }

    #[tokio::test]
    async fn test_unpaired_state_change_counts_as_auth_failure() {
        let store = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let mut cfg = config(&store);
        cfg.max_auto_resets = 0;
        let manager = ready_manager(provider.clone(), cfg).await;
        let mut events = manager.subscribe();

        provider.emit(ProviderEvent::StateChanged("CONNECTED".into()));
        provider.emit(ProviderEvent::StateChanged("UNPAIRED".into()));
        match events.recv().await.unwrap() {
            LifecycleEvent::AuthFailure { message } => assert!(message.contains("UNPAIRED")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            LifecycleEvent::RecoveryExhausted { attempts: 0 }
        );
        assert_eq!(manager.current_state(), SessionState::AuthFailed);
    }

    #[tokio::test]
    async fn test_stale_handle_events_are_ignored() {
        let store = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let manager = ready_manager(provider.clone(), config(&store)).await;

        manager.force_reset().await.unwrap();
        provider.wait_for_connects(2).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);

        // The old handle's sender may still be alive; nothing it says counts
        provider.emit_to(0, ProviderEvent::Authenticated);
        provider.emit_to(0, ProviderEvent::Ready);
        provider.emit(ProviderEvent::PairingCode("2@fresh".into()));
        tokio::time::timeout(WAIT, async {
            while manager.current_pairing_code().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.current_state(), SessionState::AwaitingPairing);
        assert_eq!(manager.current_pairing_code().as_deref(), Some("2@fresh"));
    }

    #[tokio::test]
    async fn test_connect_failures_stop_after_cap() {
        let store = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        provider.failing_connects.store(10, Ordering::SeqCst);
        let mut cfg = config(&store);
        cfg.max_auto_resets = 2;
        let (manager, _task) = SessionManager::spawn(provider.clone(), StoreCleaner::default(), cfg);
        let mut events = manager.subscribe();
        manager.start().unwrap();

        let exhausted = tokio::time::timeout(WAIT, async {
            loop {
                if let LifecycleEvent::RecoveryExhausted { attempts } = events.recv().await.unwrap() {
                    return attempts;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(exhausted, 2);
        assert_eq!(provider.connects(), 3);
        assert_eq!(manager.current_state(), SessionState::Disconnected);

        // Operator retry gets a fresh budget
        provider.failing_connects.store(0, Ordering::SeqCst);
        assert_eq!(manager.force_reset().await.unwrap(), ResetOutcome::Completed);
        provider.wait_for_connects(1).await;
        assert!(manager.wait_for_state(SessionState::AwaitingPairing, WAIT).await);
    }

    #[tokio::test]
    async fn test_locked_store_fails_reset_without_retry() {
        let store = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let mut remover = MockDirRemover::new();
        remover.expect_exists().returning(|_| true);
        remover.expect_remove_dir_all().times(2).returning(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::ResourceBusy, "locked"))
        });
        let (manager, _task) =
            SessionManager::spawn(provider.clone(), StoreCleaner::new(Arc::new(remover)), config(&store));
        let mut events = manager.subscribe();
        manager.start().unwrap();
        provider.wait_for_connects(1).await;

        let err = manager.force_reset().await.unwrap_err();
        assert!(matches!(err, MessengerError::CleanupLocked { attempts: 2, .. }));
        assert!(matches!(events.recv().await.unwrap(), LifecycleEvent::ResetFailed { .. }));
        assert_eq!(manager.current_state(), SessionState::Uninitialized);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.connects(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_store() {
        let store = TempDir::new().unwrap();
        let store_dir = seed_store(&store);
        let provider = Arc::new(FakeProvider::default());
        let manager = ready_manager(provider.clone(), config(&store)).await;

        manager.shutdown().await;
        assert_eq!(manager.current_state(), SessionState::Uninitialized);
        assert_eq!(provider.session(0).destroys.load(Ordering::SeqCst), 1);
        assert!(store_dir.exists());
        assert!(matches!(
            manager.force_reset().await,
            Err(MessengerError::ManagerStopped)
        ));
    }
}
