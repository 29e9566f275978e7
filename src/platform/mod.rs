//! Platform-specific process control for Windows and Unix

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub mod unix;

use std::process::Command;

use crate::core::ProcessError;

/// Force kill a process.
///
/// Returns [`ProcessError::NotFound`] when the pid does not (or no longer) exist.
pub fn kill_process(pid: u32) -> Result<(), ProcessError> {
    #[cfg(windows)]
    {
        windows::kill_process(pid)
    }
    #[cfg(unix)]
    {
        unix::kill_process(pid)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = pid;
        Err(ProcessError::Unsupported)
    }
}

/// Pass a raw argument string to a command
pub fn apply_arguments(cmd: &mut Command, arguments: &str) {
    #[cfg(windows)]
    {
        windows::apply_arguments(cmd, arguments);
    }
    #[cfg(unix)]
    {
        cmd.args(unix::split_arguments(arguments));
    }
    #[cfg(not(any(windows, unix)))]
    {
        cmd.args(arguments.split_whitespace());
    }
}

/// Detach a command from our console and process group
pub fn detach(cmd: &mut Command) {
    #[cfg(windows)]
    {
        windows::detach(cmd);
    }
    #[cfg(unix)]
    {
        unix::detach(cmd);
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = cmd;
    }
}
