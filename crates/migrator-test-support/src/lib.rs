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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (temp dirs, canned payloads), daemon.rs (fake daemon
//! served on a unix socket), host.rs (recording host for commands and mounts).

pub mod daemon;
pub mod fixtures;
pub mod host;

pub use daemon::{FakeDaemon, FakeDaemonState};
pub use host::{HostEvent, RecordingHost};
