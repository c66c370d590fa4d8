//! Named-pipe transport (unix).
//!
//! Open order matters. The server opens the request FIFO for writing first,
//! retrying non-blockingly until the executor attaches as reader, then opens
//! the response FIFO for reading without blocking. The executor opens the
//! request reader, then the response writer.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use super::{BuildTransport, ChannelError, REQUEST_BYTE, decode_response, encode_response};
use crate::session::Shutdown;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The two FIFOs of one session. Both are removed on drop.
#[derive(Debug)]
pub struct FifoPair {
    request: PathBuf,
    response: PathBuf,
}

impl FifoPair {
    pub fn create(request: impl Into<PathBuf>, response: impl Into<PathBuf>) -> io::Result<Self> {
        let pair = Self {
            request: request.into(),
            response: response.into(),
        };
        mkfifo(&pair.request)?;
        mkfifo(&pair.response)?;
        Ok(pair)
    }

    pub fn request(&self) -> &Path {
        &self.request
    }

    pub fn response(&self) -> &Path {
        &self.response
    }
}

impl Drop for FifoPair {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.request);
        let _ = std::fs::remove_file(&self.response);
    }
}

fn mkfifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the call's duration
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_blocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: fd is owned by `file` and open
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// ============================================================================
// Server end
// ============================================================================

type Liveness = Box<dyn FnMut() -> bool + Send>;

/// Dev-server end: writes requests, reads responses.
pub struct ServerEnd {
    request: File,
    response: File,
    peer_alive: Liveness,
}

impl ServerEnd {
    /// Attach to the executor.
    ///
    /// Retries until the executor opens its reader. Fails with
    /// [`ChannelError::Closed`] when `peer_alive` reports the executor gone
    /// and [`ChannelError::Cancelled`] when the session is cancelled first.
    pub fn connect(
        pair: &FifoPair,
        shutdown: &Shutdown,
        peer_alive: impl FnMut() -> bool + Send + 'static,
    ) -> Result<Self, ChannelError> {
        let mut peer_alive: Liveness = Box::new(peer_alive);

        let request = loop {
            match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(pair.request())
            {
                Ok(file) => break file,
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                    if shutdown.is_cancelled() {
                        return Err(ChannelError::Cancelled);
                    }
                    if !peer_alive() {
                        return Err(ChannelError::Closed);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        };
        set_blocking(&request)?;

        // Stays non-blocking: reads poll so a dead executor is noticed
        let response = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(pair.response())?;

        crate::debug!("channel"; "attached to build executor");
        Ok(Self {
            request,
            response,
            peer_alive,
        })
    }
}

impl BuildTransport for ServerEnd {
    fn send_request(&mut self) -> Result<(), ChannelError> {
        match self.request.write_all(&[REQUEST_BYTE]) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(ChannelError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn await_response(&mut self) -> Result<bool, ChannelError> {
        let mut byte = [0u8; 1];
        loop {
            match self.response.read(&mut byte) {
                Ok(1) => return decode_response(byte[0]),
                // EOF: no writer attached (yet, or any more)
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
            if !(self.peer_alive)() {
                return Err(ChannelError::Closed);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

// ============================================================================
// Executor end
// ============================================================================

/// Build-executor end: reads requests, writes responses.
pub struct ExecutorEnd {
    request: File,
    response: File,
}

impl ExecutorEnd {
    /// Attach to the dev server. Blocks until the server has opened its ends.
    pub fn connect(request: &Path, response: &Path) -> Result<Self, ChannelError> {
        let request = File::open(request)?;
        let response = OpenOptions::new().write(true).open(response)?;
        Ok(Self { request, response })
    }

    /// Block for the next request. `Ok(false)` when the server hung up.
    pub fn await_request(&mut self) -> Result<bool, ChannelError> {
        let mut byte = [0u8; 1];
        loop {
            match self.request.read(&mut byte) {
                Ok(0) => return Ok(false),
                Ok(_) if byte[0] == REQUEST_BYTE => return Ok(true),
                Ok(_) => return Err(ChannelError::BrokenResponse(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn send_response(&mut self, succeeded: bool) -> Result<(), ChannelError> {
        match self.response.write_all(&[encode_response(succeeded)]) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(ChannelError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn make_pair(dir: &TempDir) -> FifoPair {
        FifoPair::create(dir.path().join("req"), dir.path().join("resp")).unwrap()
    }

    #[test]
    fn test_fifos_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let pair = make_pair(&dir);
        assert!(pair.request().exists());
        assert!(pair.response().exists());
        let (req, resp) = (pair.request().to_path_buf(), pair.response().to_path_buf());
        drop(pair);
        assert!(!req.exists());
        assert!(!resp.exists());
    }

    #[test]
    fn test_round_trip_between_ends() {
        let dir = TempDir::new().unwrap();
        let pair = make_pair(&dir);
        let (req, resp) = (pair.request().to_path_buf(), pair.response().to_path_buf());

        let executor = thread::spawn(move || {
            let mut end = ExecutorEnd::connect(&req, &resp).unwrap();
            let mut served = 0;
            while end.await_request().unwrap() {
                served += 1;
                end.send_response(served % 2 == 1).unwrap();
            }
            served
        });

        let mut server = ServerEnd::connect(&pair, &Shutdown::new(), || true).unwrap();
        server.send_request().unwrap();
        assert!(server.await_response().unwrap());
        server.send_request().unwrap();
        assert!(!server.await_response().unwrap());

        drop(server);
        assert_eq!(executor.join().unwrap(), 2);
    }

    #[test]
    fn test_dead_executor_reports_closed() {
        let dir = TempDir::new().unwrap();
        let pair = make_pair(&dir);
        let (req, resp) = (pair.request().to_path_buf(), pair.response().to_path_buf());

        let alive = Arc::new(AtomicBool::new(true));
        let executor = {
            let alive = Arc::clone(&alive);
            thread::spawn(move || {
                let mut end = ExecutorEnd::connect(&req, &resp).unwrap();
                assert!(end.await_request().unwrap());
                // Die without responding
                drop(end);
                alive.store(false, Ordering::SeqCst);
            })
        };

        let alive_flag = Arc::clone(&alive);
        let mut server =
            ServerEnd::connect(&pair, &Shutdown::new(), move || alive_flag.load(Ordering::SeqCst))
                .unwrap();
        server.send_request().unwrap();
        assert!(matches!(server.await_response(), Err(ChannelError::Closed)));
        executor.join().unwrap();
    }

    #[test]
    fn test_connect_gives_up_without_executor() {
        let dir = TempDir::new().unwrap();
        let pair = make_pair(&dir);

        let result = ServerEnd::connect(&pair, &Shutdown::new(), || false);
        assert!(matches!(result, Err(ChannelError::Closed)));

        let shutdown = Shutdown::new();
        shutdown.cancel();
        let result = ServerEnd::connect(&pair, &shutdown, || true);
        assert!(matches!(result, Err(ChannelError::Cancelled)));
    }
}
