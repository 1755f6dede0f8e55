//! Command trait definition for CLI commands.
//!
//! The trait uses `enum_dispatch` so the subcommand enum in `main.rs` dispatches without boxing.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Trait implemented by every vardict CLI command.
///
/// `command_line` is the full invocation, logged at the start of a run.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self, command_line: &str) -> Result<()>;
}
