// CmdVault Infrastructure - System Adapters
// Implements: CommandRunner

pub mod shell_runner;

pub use shell_runner::{ShellCommandRunner, DEFAULT_KILL_GRACE, DEFAULT_SHELL};
