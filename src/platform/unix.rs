//! Unix process control (Linux and macOS)

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::core::ProcessError;

/// Force kill a process (SIGKILL)
pub fn kill_process(pid: u32) -> Result<(), ProcessError> {
    // pid 0 and negative values address process groups, never a single process
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return Err(ProcessError::NotFound { pid }),
    };

    let result = unsafe { libc::kill(raw, libc::SIGKILL) };
    if result == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(ProcessError::NotFound { pid })
    } else {
        Err(ProcessError::Terminate {
            pid,
            reason: err.to_string(),
        })
    }
}

/// Start the child in its own session so it outlives us
pub fn detach(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

/// Split a raw argument string on whitespace, keeping double-quoted runs together.
///
/// Backslashes are literal so Windows-style paths survive unchanged.
pub fn split_arguments(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if has_token {
        args.push(current);
    }
    args
}
