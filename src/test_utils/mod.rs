//! Test doubles shared by unit and integration tests.

pub mod mocks;

pub use mocks::{
    MockChainClient, MockConfig, MockConnector, MockDatabaseClient, MockDelegatedService,
    MockLogSubscriber, MockMonitor, MockMonitorBuilder, transfer_log,
};
