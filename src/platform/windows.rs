//! Windows process control

use std::os::windows::process::CommandExt;
use std::process::Command;

use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, ERROR_INVALID_PARAMETER, FALSE};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_TERMINATE,
};

use crate::core::ProcessError;

/// Exit code reported for a process that has not exited yet
const STILL_ACTIVE: u32 = 259;

/// DETACHED_PROCESS creation flag
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Force kill a process
pub fn kill_process(pid: u32) -> Result<(), ProcessError> {
    unsafe {
        let handle = match OpenProcess(
            PROCESS_TERMINATE | PROCESS_QUERY_LIMITED_INFORMATION,
            FALSE,
            pid,
        ) {
            Ok(handle) => handle,
            // OpenProcess reports a vanished pid as an invalid parameter
            Err(e) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => {
                return Err(ProcessError::NotFound { pid });
            }
            Err(e) => {
                return Err(ProcessError::Terminate {
                    pid,
                    reason: e.to_string(),
                });
            }
        };

        let result = TerminateProcess(handle, 1);
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(e) => {
                // Terminating a process that already exited fails with access denied
                let mut exit_code: u32 = 0;
                let exited = GetExitCodeProcess(handle, &mut exit_code).is_ok()
                    && exit_code != STILL_ACTIVE;
                if exited {
                    debug!("Process {} exited before termination", pid);
                    Err(ProcessError::NotFound { pid })
                } else {
                    Err(ProcessError::Terminate {
                        pid,
                        reason: e.to_string(),
                    })
                }
            }
        };

        CloseHandle(handle).ok();
        outcome
    }
}

/// Pass the argument string through verbatim, the way a shell launch would
pub fn apply_arguments(cmd: &mut Command, arguments: &str) {
    cmd.raw_arg(arguments);
}

/// Start the child without inheriting our console
pub fn detach(cmd: &mut Command) {
    cmd.creation_flags(DETACHED_PROCESS);
}
