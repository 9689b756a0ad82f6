//! Arlo audit workflow engine.
//!
//! The engine keeps a client's view of the server-driven audit state machine
//! eventually consistent, derives which setup stages are permitted, and walks
//! an audit board through its assigned ballots.
//!
//! - [`dispatch::ActionDispatcher`] wraps every outbound call with a uniform
//!   send / ok / fail / network-fail lifecycle.
//! - [`sync::SyncEngine`] polls resources single-flight and owns the canonical
//!   [`arlo_types::WorkflowState`].
//! - [`gate`] computes stage accessibility from a snapshot.
//! - [`navigator::BallotNavigator`] orders an assignment and guards submissions.
//! - [`actions::AuditActions`] performs the stage-affecting mutations.
//! - [`config`] loads polling and connection settings.

pub mod actions;
pub mod config;
pub mod dispatch;
pub mod gate;
pub mod navigator;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use actions::{ActionError, AuditActions, AuditBoardMember};
pub use config::{ConfigError, PollIntervals, SyncConfig};
pub use dispatch::{ActionDispatcher, ActionEvent, ActionKind, Outcome, Rejection};
pub use gate::{GateError, compute_stages, ensure_editable, stage_complete};
pub use navigator::{BallotNavigator, NavigationError, NavigatorError, SubmitOutcome};
pub use sync::{PollHandle, Resource, SyncEngine, SyncError, SyncEvent, SyncStatus, settle};
