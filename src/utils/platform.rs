//! Platform process helpers: browser launching and child teardown.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use super::exec::Cmd;

/// Open a URL in the default browser.
///
/// - macOS: `open`
/// - Windows: `start`
/// - Linux: `xdg-open`
pub fn open_browser(url: &str) -> Result<()> {
    let cmd = if cfg!(target_os = "macos") {
        Cmd::new("open").arg(url)
    } else if cfg!(target_os = "windows") {
        Cmd::new("cmd").args(["/C", "start", url])
    } else {
        Cmd::new("xdg-open").arg(url)
    };
    cmd.spawn()?;
    Ok(())
}

/// Poll `child` until it exits or `timeout` passes.
pub fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Stop a child process: wait up to `grace`, then SIGTERM, then kill.
pub fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = wait_timeout(child, grace)? {
        return Ok(status);
    }

    #[cfg(unix)]
    {
        crate::debug!("process"; "sending SIGTERM to {}", child.id());
        // SAFETY: signalling a pid we own; the child has not been reaped yet
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        if let Some(status) = wait_timeout(child, grace / 2)? {
            return Ok(status);
        }
    }

    crate::debug!("process"; "killing {}", child.id());
    child.kill()?;
    child.wait()
}

/// Whether the child has already exited. Errors count as exited.
pub fn has_exited(child: &mut Child) -> bool {
    !matches!(child.try_wait(), Ok(None))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_wait_timeout_returns_exited_status() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_timeout(&mut child, Duration::from_secs(5)).unwrap();
        assert!(status.unwrap().success());
        assert!(has_exited(&mut child));
    }

    #[test]
    fn test_shutdown_child_terminates_sleeper() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert!(!has_exited(&mut child));

        let started = Instant::now();
        let status = shutdown_child(&mut child, Duration::from_millis(100)).unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
