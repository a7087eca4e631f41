//! tickbox-core library.
//!
//! Tickets live as directories of small marker files on a dedicated
//! maintenance branch. Each mutation is one commit, so the branch history is
//! the audit log.
//!
//! - [`codec`] maps titles to ticket names and fields to file names.
//! - [`schema`] declares storage mode and cardinality per field kind.
//! - [`model`] rebuilds a [`TicketRecord`] from a ticket directory.
//! - [`tracker`] applies guarded mutations through a [`store::Transaction`].
//! - [`store`] defines the [`VersionedStore`] seam plus in-memory and git
//!   implementations.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums in the library, `anyhow::Result` for
//!   config loading and binaries.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;
pub mod tracker;

pub use error::{ErrorCode, StoreError, TicketError};
pub use model::{Attachment, Comment, IntegrityIssue, TicketRecord};
pub use store::VersionedStore;
pub use tracker::{Author, CreateOptions, Outcome, SkipReason, Tracker};
