//! # arena-id
//!
//! Identifier types for provisioned game servers.
//!
//! ## Identifier Lifecycle
//!
//! A server carries two identities during its life:
//!
//! - [`ServerId`]: generated by the orchestrator before anything is created,
//!   in the form `{template}-{unix_nanos}`. It owns pool resources while a
//!   provisioning attempt is in flight and becomes the server's display name.
//! - [`InstanceId`]: assigned by the orchestration provider once the container
//!   exists. Committed pool entries are re-keyed to it so teardown, which is
//!   addressed by instance id, can release them.
//!
//! Both are string newtypes so they cannot be mixed up at call sites, while
//! still exposing `&str` for places that only need an opaque owner key.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
