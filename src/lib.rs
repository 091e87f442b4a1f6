//! Multi-chain deposit detection and monitoring.
//!
//! Watches EVM chains in-process (address history polling, Transfer-log
//! subscriptions, block-range log polling) and hands non-EVM families to
//! external watchers. Every observed transfer is recorded at most once, keyed
//! on `(chain, tx_hash)`, and pushed to the owning user's live session.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
