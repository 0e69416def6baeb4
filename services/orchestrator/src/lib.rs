//! Arena game-server orchestrator.
//!
//! This crate primarily ships an `orchestrator` binary, but exposes its
//! library surface for integration testing.

pub mod api;
pub mod config;
pub mod hook;
pub mod provider;
pub mod provision;
pub mod reconciler;
pub mod state;
pub mod template;
