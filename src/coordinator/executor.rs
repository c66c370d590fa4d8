//! Build executor loop (the `build-executor` subcommand).
//!
//! Runs in its own process. Waits for a request byte, runs the build, writes
//! the compiler output to the log file, then answers `1` (success) or `0`
//! (failure). Exits cleanly when the dev server closes the request FIFO.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::ExecutorArgs;
use crate::log;
use crate::utils::exec::{CARGO_FILTER, Cmd, combined_output};

/// Serve build requests until the dev server hangs up.
#[cfg(unix)]
pub fn run(args: &ExecutorArgs) -> Result<()> {
    use crate::channel::ExecutorEnd;

    let mut end = ExecutorEnd::connect(&args.request, &args.response)
        .context("Failed to attach to the dev server")?;
    crate::debug!("build"; "executor attached");

    while end.await_request()? {
        let succeeded = match build_once(args) {
            Ok(succeeded) => succeeded,
            Err(e) => {
                // Spawning the compiler failed; that is a failed build too
                let text = format!("{e:#}\n");
                let _ = fs::write(&args.log, &text);
                log!("error"; "{}", text.trim_end());
                false
            }
        };
        end.send_response(succeeded)?;
    }

    crate::debug!("build"; "dev server closed the channel, exiting");
    Ok(())
}

#[cfg(not(unix))]
pub fn run(_args: &ExecutorArgs) -> Result<()> {
    Err(crate::channel::ChannelError::Unsupported.into())
}

/// Run one build. `Ok(false)` when the compiler reported failure.
pub fn build_once(args: &ExecutorArgs) -> Result<bool> {
    let cmd = build_command(args);
    crate::debug!("build"; "{}", cmd.display());

    let output = cmd.output()?;
    let text = combined_output(&output);
    write_log(&args.log, &text)?;
    CARGO_FILTER.log("build", &text);
    Ok(output.status.success())
}

/// `<command…> --target <triple> --bin <product> [--release]` in the manifest dir.
pub fn build_command(args: &ExecutorArgs) -> Cmd {
    Cmd::from_slice(&args.command)
        .arg("--target")
        .arg(&args.target)
        .arg("--bin")
        .arg(&args.product)
        .arg_if(args.release, "--release")
        .cwd(&args.manifest_dir)
        .env("CARGO_TERM_COLOR", "never")
}

fn write_log(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).with_context(|| format!("Failed to write build log {}", path.display()))
}
