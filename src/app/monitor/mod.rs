//! Chain monitors: one variant per detection strategy.
//!
//! Every monitor owns its background work through a [`MonitorCore`]. `stop()`
//! flips the done flag and aborts every task, and tasks re-check the flag
//! before recording or notifying, so a stopped monitor stays silent.

pub mod delegated;
pub mod evm_native;
pub mod evm_token_poll;
pub mod evm_token_push;

use std::env;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::domain::{
    AppError, ChainClient, MonitorKind, MonitorState, SessionEvent, WatchTarget,
};

use super::hub::NotificationHub;
use super::recorder::TransactionRecorder;

pub use delegated::DelegatedMonitor;
pub use evm_native::EvmNativeMonitor;
pub use evm_token_poll::EvmTokenPollMonitor;
pub use evm_token_push::EvmTokenPushMonitor;

/// A running watch over one address
#[async_trait]
pub trait ChainMonitor: Send + Sync {
    fn kind(&self) -> MonitorKind;

    fn target(&self) -> &WatchTarget;

    fn state(&self) -> MonitorState;

    /// Receiver that observes every state transition
    fn subscribe_state(&self) -> watch::Receiver<MonitorState>;

    /// Begin watching. Fails if the monitor cannot start; a monitor starts at most once.
    async fn start(&self) -> Result<(), AppError>;

    /// Cancel all background work. Idempotent; nothing fires after it returns.
    fn stop(&self);

    /// Still detecting (started and neither stopped nor finished)
    fn is_live(&self) -> bool;
}

/// Detection tuning shared by the EVM monitors
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// History poll interval for native-asset watches
    pub native_poll_interval: Duration,
    /// How long a push listener stays up after its first accepted deposit
    pub token_listener_grace: Duration,
    /// Base interval between log polls
    pub token_poll_interval: Duration,
    pub max_blocks_per_poll: u64,
    /// Consecutive failed polls tolerated before the watch is abandoned
    pub max_backoff_attempts: u32,
    /// Stop a poll watch after its first accepted deposit
    pub stop_on_first_deposit: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            native_poll_interval: Duration::from_secs(10),
            token_listener_grace: Duration::from_secs(30 * 60),
            token_poll_interval: Duration::from_secs(15),
            max_blocks_per_poll: 500,
            max_backoff_attempts: 5,
            stop_on_first_deposit: false,
        }
    }
}

impl MonitorConfig {
    /// Read `MONITOR_*` overrides, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str| {
            env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        Self {
            native_poll_interval: secs("MONITOR_NATIVE_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.native_poll_interval),
            token_listener_grace: secs("MONITOR_TOKEN_LISTENER_GRACE_SECS")
                .unwrap_or(defaults.token_listener_grace),
            token_poll_interval: secs("MONITOR_TOKEN_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.token_poll_interval),
            max_blocks_per_poll: env::var("MONITOR_MAX_BLOCKS_PER_POLL")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_blocks_per_poll),
            max_backoff_attempts: env::var("MONITOR_MAX_BACKOFF_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_backoff_attempts),
            stop_on_first_deposit: env::var("MONITOR_STOP_ON_FIRST_DEPOSIT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.stop_on_first_deposit),
        }
    }
}

/// Collaborators every monitor needs
#[derive(Clone)]
pub struct MonitorContext {
    pub recorder: Arc<TransactionRecorder>,
    pub hub: Arc<NotificationHub>,
    pub config: MonitorConfig,
}

/// Lifecycle bookkeeping shared by all monitor variants
pub struct MonitorCore {
    target: WatchTarget,
    kind: MonitorKind,
    hub: Arc<NotificationHub>,
    state: watch::Sender<MonitorState>,
    started: AtomicBool,
    done: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorCore {
    pub fn new(target: WatchTarget, kind: MonitorKind, hub: Arc<NotificationHub>) -> Arc<Self> {
        let (state, _) = watch::channel(MonitorState::Idle);
        Arc::new(Self {
            target,
            kind,
            hub,
            state,
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Claim the single start. Errors on a second call or after `stop()`.
    pub fn begin(&self) -> Result<(), AppError> {
        if self.is_done() || self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::Internal(format!(
                "{} monitor for {} already started",
                self.kind, self.target.address
            )));
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.is_done()
    }

    /// Publish a state unless the monitor already reached a terminal one
    pub fn set_state(&self, next: MonitorState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Run `future` as part of this monitor. Dropped immediately if already stopped.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_done() {
            handle.abort();
            return;
        }
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Detection finished on its own; background work winds down without an abort
    pub fn finish(&self, state: MonitorState) {
        self.done.store(true, Ordering::SeqCst);
        self.set_state(state);
    }

    /// Abandon the watch and tell the owning session why
    pub fn fail(&self, reason: impl Into<String>) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        error!(
            user_id = %self.target.user_id,
            chain = %self.target.chain,
            address = %self.target.address,
            monitor = %self.kind,
            reason = %reason,
            "Monitor failed"
        );
        self.set_state(MonitorState::Failed);
        self.hub.send(
            &self.target.user_id,
            SessionEvent::Failed {
                chain: self.target.chain,
                currency: self.target.currency.clone(),
                address: self.target.address.clone(),
                reason,
                status: MonitorState::Failed,
            },
        );
    }

    pub fn stop(&self) {
        self.done.store(true, Ordering::SeqCst);
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in &tasks {
            task.abort();
        }
        self.set_state(MonitorState::Stopped);
        debug!(
            user_id = %self.target.user_id,
            address = %self.target.address,
            monitor = %self.kind,
            aborted = tasks.len(),
            "Monitor stopped"
        );
    }
}

/// Depth of a transaction mined in `block`, or 0 when unknown
pub(crate) async fn confirmations_at(client: &dyn ChainClient, block: Option<u64>) -> u64 {
    let Some(block) = block else {
        return 0;
    };
    match client.block_number().await {
        Ok(head) if head >= block => head - block + 1,
        Ok(_) => 0,
        Err(e) => {
            debug!(error = %e, "Head lookup failed; recording without depth");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chain, ContractKind};
    use uuid::Uuid;

    fn core() -> Arc<MonitorCore> {
        let target = WatchTarget {
            user_id: "user-1".to_string(),
            wallet_id: Uuid::new_v4(),
            chain: Chain::Ethereum,
            currency: "ETH".to_string(),
            address: "0xabc".to_string(),
            contract: ContractKind::Native,
            token: None,
        };
        MonitorCore::new(target, MonitorKind::EvmNative, Arc::new(NotificationHub::new()))
    }

    #[test]
    fn test_config_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.native_poll_interval, Duration::from_secs(10));
        assert_eq!(config.token_listener_grace, Duration::from_secs(1800));
        assert_eq!(config.max_blocks_per_poll, 500);
        assert_eq!(config.max_backoff_attempts, 5);
        assert!(!config.stop_on_first_deposit);
    }

    #[tokio::test]
    async fn test_begin_only_once() {
        let core = core();
        assert!(core.begin().is_ok());
        assert!(core.is_live());
        assert!(core.begin().is_err());
    }

    #[tokio::test]
    async fn test_stop_aborts_tasks_and_is_terminal() {
        let core = core();
        core.begin().unwrap();
        core.set_state(MonitorState::Watching);

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        core.spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        core.stop();
        core.stop();
        // The aborted task drops its sender
        assert!(rx.recv().await.is_none());
        assert_eq!(core.state(), MonitorState::Stopped);

        core.set_state(MonitorState::Found);
        assert_eq!(core.state(), MonitorState::Stopped);
        assert!(!core.is_live());
    }

    #[tokio::test]
    async fn test_fail_notifies_owner_once() {
        let core = core();
        let (_, mut rx) = core.hub.connect("user-1");
        core.begin().unwrap();

        core.fail("provider unavailable");
        core.fail("again");
        core.stop();

        match rx.recv().await {
            Some(SessionEvent::Failed { reason, status, .. }) => {
                assert_eq!(reason, "provider unavailable");
                assert_eq!(status, MonitorState::Failed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(core.state(), MonitorState::Failed);
    }
}
