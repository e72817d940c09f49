#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! LXD to Incus migration: discovery, planning, cluster coordination and the
//! phase sequencer.
//!
//! Layout: `bootstrap.rs` (production wiring), `orchestrator.rs` (phases),
//! `daemons.rs` (source/target candidates and paths), `rewrite.rs` and
//! `ovn.rs` (migration plan), `cluster.rs` (member coordination),
//! `validate.rs` (pre-flight checks), `database.rs` (database step),
//! `prompt.rs` (operator confirmation), `report.rs` (phase records).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Cluster evacuation, convergence and restore.
pub mod cluster;
/// Source and target daemon candidates.
pub mod daemons;
/// Database step behind an opaque seam.
pub mod database;
/// Application error type.
pub mod error;
/// Migration phase sequencer.
pub mod orchestrator;
/// OVN and OVS rewrites.
pub mod ovn;
/// Operator confirmation.
pub mod prompt;
/// Per-phase run report.
pub mod report;
/// Storage rewrites and the migration plan.
pub mod rewrite;
/// Pre-flight validation.
pub mod validate;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use orchestrator::{Migration, MigrationDeps};
pub use report::{MigrationReport, Phase, PhaseStatus};
