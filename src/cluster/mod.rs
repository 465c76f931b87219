//! Cluster Members
//!
//! Client handles for every configured member and the per-member state
//! snapshots derived from polling them.

mod member;

pub use member::{member_name, Cluster, ClusterMember, HealthState, SealState};
