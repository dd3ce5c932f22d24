//! Shared types for the podrelay forwarding system
//!
//! This crate holds the plain data that flows between the cluster lifecycle,
//! the stream dialer and the forwarder: the session input (`ForwardSpec`),
//! the identity of a scheduled relay workload, and the phase enums used to
//! track a session.

pub mod session;
pub mod spec;
pub mod workload;

pub use session::SessionPhase;
pub use spec::{ForwardSpec, SpecError};
pub use workload::{WorkloadHandle, WorkloadStatus};
