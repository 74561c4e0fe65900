//! Small process-related helpers shared across the workspace.
//!
//! Besides windowless command construction, this crate knows how to retire a
//! child process politely: a termination request first, a hard kill once the
//! grace window has passed.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
pub use self::tokio_support::*;

#[cfg(feature = "tokio")]
mod tokio_support {
    use std::ffi::OsStr;
    use std::process::ExitStatus;
    use std::time::Duration;

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd
    }

    /// How a child process ended after [`terminate_with_grace`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Termination {
        /// The process honoured the termination request (or had already exited).
        Exited(ExitStatus),
        /// The grace window elapsed and the process was killed.
        Killed,
    }

    /// Ask a child process to exit.
    ///
    /// On unix this delivers `SIGTERM` so the child can flush and close its
    /// outputs. Elsewhere there is no polite signal, so the process is killed.
    ///
    /// Returns `false` if the process had already been reaped.
    pub fn request_terminate(child: &mut tokio::process::Child) -> std::io::Result<bool> {
        let Some(pid) = child.id() else {
            return Ok(false);
        };

        #[cfg(unix)]
        {
            let Ok(pid) = libc::pid_t::try_from(pid) else {
                return Err(std::io::Error::other(format!("pid {pid} out of range")));
            };
            // SAFETY: kill(2) has no memory-safety preconditions; the pid
            // belongs to a child we have not reaped yet.
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(true)
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            child.start_kill()?;
            Ok(true)
        }
    }

    /// Terminate a child process, escalating to a kill after `grace`.
    ///
    /// Always reaps the child before returning, so no zombie is left behind.
    pub async fn terminate_with_grace(
        child: &mut tokio::process::Child,
        grace: Duration,
    ) -> std::io::Result<Termination> {
        if !request_terminate(child)? {
            return child.wait().await.map(Termination::Exited);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status.map(Termination::Exited),
            Err(_) => {
                child.kill().await?;
                Ok(Termination::Killed)
            }
        }
    }
}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_terminate_cooperative_child() {
        let mut child = tokio_command("sleep").arg("30").spawn().unwrap();

        let started = Instant::now();
        let outcome = terminate_with_grace(&mut child, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(matches!(outcome, Termination::Exited(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut child = tokio_command("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        // Let the shell install its trap before we signal it.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = terminate_with_grace(&mut child, Duration::from_millis(200))
            .await
            .unwrap();

        assert_eq!(outcome, Termination::Killed);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut child = tokio_command("true").spawn().unwrap();
        child.wait().await.unwrap();

        let outcome = terminate_with_grace(&mut child, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(outcome, Termination::Exited(status) if status.success()));
    }
}
