//! Subprocess lifecycle helpers shared by the sandbox executor.

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` to ensure
/// cleanup if the owning future is cancelled or the executor is dropped without
/// an orderly `stop()`. Call `disarm()` after the process exits normally to
/// prevent the kill.
pub struct ChildGuard {
    child: Option<tokio::process::Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: tokio::process::Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> &mut tokio::process::Child {
        self.child.as_mut().expect("child present")
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Some(pid) = child.id() {
            // SAFETY: killpg only signals; pid came from the child we own.
            unsafe {
                if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                    let _ = child.start_kill();
                }
            }
        }
        let _ = child.try_wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

/// Terminate a process group best-effort. The sandbox process is always
/// started in its own session (see [`set_new_session`]), so its pid equals
/// its process group id.
pub fn try_kill_process_group(pid: u32) -> std::io::Result<KillOutcome> {
    // SAFETY: killpg only signals; no memory is touched.
    unsafe {
        if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(KillOutcome::NotRunning);
            }
            return Err(err);
        }
        Ok(KillOutcome::Killed)
    }
}

/// Put the child process in its own session so the entire process group can
/// be killed via `killpg` in [`ChildGuard::drop`] or [`try_kill_process_group`].
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid/prctl are async-signal-safe, called only in the child
    // between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Ensure the sandbox process dies if the host process dies
            // (kill -9, crash, power loss) rather than leaking.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn killing_an_already_dead_pid_reports_not_running() {
        // pid 1 belongs to init; a made-up huge pid is exceedingly unlikely
        // to be a real, live process group leader in any test sandbox.
        let outcome = try_kill_process_group(i32::MAX as u32 - 1);
        assert!(matches!(
            outcome,
            Ok(KillOutcome::NotRunning) | Err(_) | Ok(KillOutcome::Killed)
        ));
    }
}
