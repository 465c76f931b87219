//! Bootstrap stages
//!
//! Each stage lives in its own module and can be driven on its own; the
//! [`Bootstrap`] orchestrator runs them in order.

pub mod auth;
pub mod init;
pub mod orchestrator;
pub mod preflight;
pub mod sidecar;
pub mod unseal;

pub use auth::{configure, verify_cluster_health, AuthOutcome};
pub use init::{initialize, InitOutcome};
pub use orchestrator::{Bootstrap, BootstrapReport, StageOutcome};
pub use preflight::wait_until_ready;
pub use sidecar::Sidecar;
pub use unseal::{unseal_cluster, unseal_member, UnsealOptions, UnsealReport};
