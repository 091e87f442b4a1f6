//! Per-user watch sessions with grace-period teardown.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::domain::{AppError, AttachRequest, MonitorKind, MonitorState, SessionInfo, WatchKey};

use super::factory::MonitorBuilder;
use super::monitor::ChainMonitor;

/// Session lifecycle tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a monitor outlives its client's disconnect
    pub grace_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(600),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let grace_period = env::var("SESSION_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Self::default().grace_period);
        Self { grace_period }
    }
}

/// Result of a successful attach
#[derive(Debug, Clone, PartialEq)]
pub struct AttachOutcome {
    pub kind: MonitorKind,
    /// The live monitor for this exact target was kept
    pub reused: bool,
    pub state: MonitorState,
}

#[derive(Default)]
struct Slot {
    monitor: Option<Arc<dyn ChainMonitor>>,
    teardown: Option<JoinHandle<()>>,
    /// Bumped whenever a scheduled teardown is cancelled
    epoch: u64,
}

impl Slot {
    fn cancel_teardown(&mut self) -> bool {
        self.epoch += 1;
        match self.teardown.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

fn request_key(request: &AttachRequest) -> WatchKey {
    WatchKey {
        chain: request.chain,
        currency: request.currency.trim().to_ascii_uppercase(),
        address: request.chain.normalize_address(&request.address),
    }
}

/// Holds at most one live monitor per user.
///
/// Slots live in a concurrent map and each slot has its own async lock, so
/// attach and detach for one user are serialized without blocking others.
/// Whoever takes a slot's lock re-checks that the slot is still the one in
/// the map, since a teardown may have removed it in the meantime.
pub struct SessionRegistry {
    builder: Arc<dyn MonitorBuilder>,
    config: SessionConfig,
    slots: Arc<DashMap<String, Arc<Mutex<Slot>>>>,
}

impl SessionRegistry {
    pub fn new(builder: Arc<dyn MonitorBuilder>, config: SessionConfig) -> Self {
        Self {
            builder,
            config,
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Start watching for `user_id`, or keep the watch already running.
    ///
    /// A pending teardown is cancelled. A live monitor for the same target is
    /// reused as is. A different target replaces the current monitor once the
    /// new one has started; if it cannot start, the old one is kept.
    #[instrument(skip(self, request), fields(chain = %request.chain, currency = %request.currency))]
    pub async fn attach(
        &self,
        user_id: &str,
        request: &AttachRequest,
    ) -> Result<AttachOutcome, AppError> {
        let key = request_key(request);
        loop {
            let slot_ref = self
                .slots
                .entry(user_id.to_string())
                .or_default()
                .value()
                .clone();
            let mut slot = slot_ref.lock().await;
            if !self.is_current(user_id, &slot_ref) {
                continue;
            }

            if slot.cancel_teardown() {
                debug!("Reconnected within grace period; teardown cancelled");
            }

            if let Some(monitor) = slot.monitor.as_ref()
                && monitor.is_live()
                && monitor.target().key() == key
            {
                return Ok(AttachOutcome {
                    kind: monitor.kind(),
                    reused: true,
                    state: monitor.state(),
                });
            }

            let started = match self.builder.build(user_id, request).await {
                Ok(monitor) => monitor.start().await.map(|()| monitor),
                Err(e) => Err(e),
            };
            let monitor = match started {
                Ok(monitor) => monitor,
                Err(e) => {
                    if slot.monitor.is_none() {
                        drop(slot);
                        self.remove_slot(user_id, &slot_ref);
                    }
                    return Err(e);
                }
            };

            if let Some(previous) = slot.monitor.replace(Arc::clone(&monitor)) {
                previous.stop();
                info!(
                    previous = %previous.target().address,
                    address = %monitor.target().address,
                    "Replaced watch with a new target"
                );
            } else {
                info!(monitor = %monitor.kind(), address = %monitor.target().address, "Watch started");
            }
            return Ok(AttachOutcome {
                kind: monitor.kind(),
                reused: false,
                state: monitor.state(),
            });
        }
    }

    /// The client went away; stop its monitor unless it reattaches within the grace period
    pub async fn detach(&self, user_id: &str) {
        let Some(slot_ref) = self.slots.get(user_id).map(|s| s.value().clone()) else {
            return;
        };
        let mut slot = slot_ref.lock().await;
        if slot.monitor.is_none() || !self.is_current(user_id, &slot_ref) {
            return;
        }
        slot.cancel_teardown();
        let epoch = slot.epoch;

        let grace = self.config.grace_period;
        let slots = Arc::clone(&self.slots);
        let user = user_id.to_string();
        let task_slot = Arc::clone(&slot_ref);
        slot.teardown = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut slot = task_slot.lock().await;
            if slot.epoch != epoch {
                return;
            }
            slot.teardown = None;
            if let Some(monitor) = slot.monitor.take() {
                monitor.stop();
                info!(user_id = %user, address = %monitor.target().address, "Grace period elapsed; watch stopped");
            }
            drop(slot);
            slots.remove_if(&user, |_, current| Arc::ptr_eq(current, &task_slot));
        }));
        debug!(user_id = %user_id, grace_secs = grace.as_secs(), "Teardown scheduled");
    }

    /// Tear the user's watch down now. Returns whether there was one.
    pub async fn stop(&self, user_id: &str) -> bool {
        let Some(slot_ref) = self.slots.get(user_id).map(|s| s.value().clone()) else {
            return false;
        };
        let mut slot = slot_ref.lock().await;
        slot.cancel_teardown();
        let monitor = slot.monitor.take();
        drop(slot);
        self.remove_slot(user_id, &slot_ref);

        match monitor {
            Some(monitor) => {
                monitor.stop();
                info!(user_id = %user_id, address = %monitor.target().address, "Watch stopped by client");
                true
            }
            None => false,
        }
    }

    /// Stop every watch, e.g. on shutdown
    pub async fn stop_all(&self) {
        let users: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for user in users {
            self.stop(&user).await;
        }
    }

    /// Current sessions, for the `/sessions` listing
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let slots: Vec<(String, Arc<Mutex<Slot>>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut sessions = Vec::with_capacity(slots.len());
        for (user_id, slot_ref) in slots {
            let slot = slot_ref.lock().await;
            if let Some(monitor) = slot.monitor.as_ref() {
                let target = monitor.target();
                sessions.push(SessionInfo {
                    user_id,
                    chain: target.chain,
                    currency: target.currency.clone(),
                    address: target.address.clone(),
                    monitor: monitor.kind(),
                    state: monitor.state(),
                    teardown_pending: slot.teardown.is_some(),
                });
            }
        }
        sessions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn is_current(&self, user_id: &str, slot_ref: &Arc<Mutex<Slot>>) -> bool {
        self.slots
            .get(user_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot_ref))
    }

    fn remove_slot(&self, user_id: &str, slot_ref: &Arc<Mutex<Slot>>) {
        self.slots
            .remove_if(user_id, |_, current| Arc::ptr_eq(current, slot_ref));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Chain;
    use crate::test_utils::mocks::MockMonitorBuilder;

    fn usdt(address: &str) -> AttachRequest {
        AttachRequest {
            chain: Chain::Ethereum,
            currency: "USDT".to_string(),
            address: address.to_string(),
        }
    }

    fn registry(builder: &Arc<MockMonitorBuilder>) -> SessionRegistry {
        SessionRegistry::new(
            Arc::clone(builder) as Arc<dyn MonitorBuilder>,
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_second_attach_reuses_live_monitor() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        let first = registry.attach("user-1", &usdt("0xABC")).await.unwrap();
        let second = registry.attach("user-1", &usdt("0xabc")).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(builder.built().len(), 1);
        assert_eq!(builder.built()[0].starts(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_new_target_replaces_monitor() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        let outcome = registry.attach("user-1", &usdt("0xdef")).await.unwrap();

        assert!(!outcome.reused);
        let built = builder.built();
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].stops(), 1);
        assert_eq!(built[1].stops(), 0);
        assert_eq!(registry.snapshot().await[0].address, "0xdef");
    }

    #[tokio::test]
    async fn test_failed_replacement_keeps_current_watch() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        builder.set_failing(true);
        assert!(registry.attach("user-1", &usdt("0xdef")).await.is_err());

        assert_eq!(builder.built()[0].stops(), 0);
        assert_eq!(registry.snapshot().await[0].address, "0xabc");
    }

    #[tokio::test]
    async fn test_failed_first_attach_leaves_no_session() {
        let builder = Arc::new(MockMonitorBuilder::new());
        builder.set_failing(true);
        let registry = registry(&builder);

        assert!(registry.attach("user-1", &usdt("0xabc")).await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_after_grace_period() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        registry.detach("user-1").await;
        assert!(registry.snapshot().await[0].teardown_pending);

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(builder.built()[0].stops(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(builder.built()[0].stops(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_within_grace_cancels_teardown() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        registry.detach("user-1").await;
        tokio::time::sleep(Duration::from_secs(300)).await;

        let outcome = registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        assert!(outcome.reused);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(builder.built().len(), 1);
        assert_eq!(builder.built()[0].stops(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_detach_stops_once() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        registry.detach("user-1").await;
        registry.detach("user-1").await;

        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(builder.built()[0].stops(), 1);
    }

    #[tokio::test]
    async fn test_explicit_stop_is_immediate() {
        let builder = Arc::new(MockMonitorBuilder::new());
        let registry = registry(&builder);

        registry.attach("user-1", &usdt("0xabc")).await.unwrap();
        assert!(registry.stop("user-1").await);
        assert!(!registry.stop("user-1").await);
        assert_eq!(builder.built()[0].stops(), 1);
        assert!(registry.is_empty());
    }
}
