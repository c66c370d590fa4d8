//! The build executor subprocess.

use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::config::Config;
use crate::session::Session;
use crate::utils::exec::Cmd;
use crate::utils::platform::{has_exited, shutdown_child};

/// Handle to the spawned `build-executor` process.
#[derive(Clone)]
pub struct ExecutorProcess {
    child: Arc<Mutex<Child>>,
}

impl ExecutorProcess {
    /// Re-launch the current binary as the executor for `session`.
    pub fn spawn(session: &Session) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the wasmdev executable")?;
        let child = executor_command(exe, &session.config, session)
            .spawn()
            .context("Failed to start the build executor")?;
        crate::debug!("build"; "executor pid {}", child.id());
        Ok(Self {
            child: Arc::new(Mutex::new(child)),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.lock().id()
    }

    /// Liveness check for the channel's server end.
    pub fn liveness(&self) -> impl FnMut() -> bool + Send + 'static {
        let child = Arc::clone(&self.child);
        move || !has_exited(&mut child.lock())
    }

    /// Wait up to `grace` for a clean exit, then terminate.
    pub fn terminate(&self, grace: Duration) -> Result<ExitStatus> {
        let status = shutdown_child(&mut self.child.lock(), grace)
            .context("Failed to stop the build executor")?;
        crate::debug!("build"; "executor exited: {}", status);
        Ok(status)
    }
}

fn executor_command(exe: std::path::PathBuf, config: &Config, session: &Session) -> Cmd {
    let build = &config.build;
    Cmd::new(exe)
        .arg_if(crate::logger::is_verbose(), "--verbose")
        .arg("build-executor")
        .arg("--request")
        .arg(session.request_fifo_path())
        .arg("--response")
        .arg(session.response_fifo_path())
        .arg("--log")
        .arg(session.build_log_path())
        .arg("--product")
        .arg(build.product_name())
        .arg_if(build.release, "--release")
        .arg("--target")
        .arg(&build.target)
        .arg("--manifest-dir")
        .arg(&build.manifest_dir)
        .arg("--")
        .args(&build.command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;

    #[test]
    fn test_executor_command_line() {
        let mut config = test_parse_config(
            r#"
            [build]
            product = "demo"
            release = true
            command = ["cargo", "+nightly", "build"]
            "#,
        );
        config.build.manifest_dir = "/work/demo".into();
        let session = Session::new(config).unwrap();

        let cmd = executor_command("/bin/wasmdev".into(), &session.config, &session);
        let line = cmd.display();
        assert!(line.contains("build-executor"));
        assert!(line.contains("--product demo"));
        assert!(line.contains("--release"));
        assert!(line.contains("--target wasm32-wasip1"));
        assert!(line.contains("--manifest-dir /work/demo"));
        assert!(line.ends_with("-- cargo +nightly build"));
        assert!(line.contains(&session.request_fifo_path().display().to_string()));
    }
}
