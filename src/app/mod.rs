//! Application layer: monitors, sessions, recording and background sweeps.

pub mod factory;
pub mod hub;
pub mod monitor;
pub mod recorder;
pub mod registry;
pub mod service;
pub mod state;
pub mod sweep;

pub use factory::{MonitorBuilder, MonitorFactory};
pub use hub::NotificationHub;
pub use monitor::{ChainMonitor, MonitorConfig, MonitorContext};
pub use recorder::{DepositOwner, TransactionRecorder};
pub use registry::{AttachOutcome, SessionConfig, SessionRegistry};
pub use service::AppService;
pub use state::AppState;
pub use sweep::{SweepConfig, SweepStats, VerificationSweep, spawn_sweep};
