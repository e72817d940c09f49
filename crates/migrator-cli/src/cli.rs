//! Argument parsing and dispatch for `lxd-to-incus`.

use std::ffi::OsString;

use clap::Parser;
use clap::error::ErrorKind;
use migrator_config::Flags;
use nix::unistd::geteuid;

use crate::error::{CliError, CliResult};

#[derive(Debug, Parser)]
#[command(
    name = "lxd-to-incus",
    version,
    about = "LXD to Incus migration tool",
    long_about = "Converts an existing LXD installation into an Incus one.\n\n\
                  On clusters, run it on one server and follow the instructions \
                  it prints for the other servers."
)]
struct Cli {
    /// Answer yes to all questions
    #[arg(long)]
    yes: bool,

    /// Used internally for cluster migrations
    #[arg(long = "cluster-member", hide = true)]
    cluster_member: bool,
}

impl Cli {
    const fn flags(&self) -> Flags {
        Flags {
            assume_yes: self.yes,
            cluster_member: self.cluster_member,
        }
    }
}

/// Parse the process arguments, run the migration and return the exit code.
#[must_use]
pub fn run() -> i32 {
    run_with(std::env::args_os())
}

/// Parse `args`, run the migration and return the process exit code.
///
/// Usage errors exit with 1 like every other failure; `--help` and
/// `--version` exit with 0.
#[must_use]
pub fn run_with<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => return usage_exit(&err),
    };
    match dispatch(&cli, geteuid().is_root()) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err.display_message());
            err.exit_code()
        }
    }
}

fn usage_exit(err: &clap::Error) -> i32 {
    let _ = err.print();
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn dispatch(cli: &Cli, is_root: bool) -> CliResult<()> {
    if !is_root {
        return Err(CliError::precondition("This tool must be run as root"));
    }
    migrator_app::run_app(cli.flags()).map_err(CliError::failure)
}
