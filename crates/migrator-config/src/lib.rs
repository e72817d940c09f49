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

//! Runtime settings for the migration, resolved from flags and the environment.
//!
//! Layout: `defaults.rs` (env names and retry defaults), `model.rs` (typed
//! settings and the convergence retry policy), `error.rs` (`ConfigError`).

pub mod defaults;
pub mod error;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::{Flags, LogOutput, MigrationSettings, RetryPolicy};
