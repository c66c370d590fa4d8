//! Build request channel.
//!
//! A dumb one-byte rendezvous transport between the dev server and the
//! out-of-process build executor:
//!
//! ```text
//! dev server                          build executor
//!   send_request()  --[request FIFO]-->  await_request()
//!   await_response() <-[response FIFO]-- send_response(ok)
//! ```
//!
//! The channel does not enforce "one request in flight"; the coordinator
//! does. Response bytes: `1` build succeeded, `0` build failed.

#[cfg(unix)]
mod fifo;

#[cfg(unix)]
pub use fifo::{ExecutorEnd, FifoPair, ServerEnd};

use thiserror::Error;

/// Marker written for every build request.
pub const REQUEST_BYTE: u8 = b'b';
pub const RESPONSE_SUCCESS: u8 = 1;
pub const RESPONSE_FAILURE: u8 = 0;

/// Channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The other side went away (executor exited, FIFO closed).
    #[error("build channel closed")]
    Closed,

    #[error("unexpected response byte {0:#04x} on build channel")]
    BrokenResponse(u8),

    /// The session was cancelled before the other side attached.
    #[error("build channel cancelled")]
    Cancelled,

    #[error("build channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("named pipes are not supported on this platform")]
    Unsupported,
}

/// Dev-server side of the channel.
pub trait BuildTransport: Send + 'static {
    /// Write one request marker.
    fn send_request(&mut self) -> Result<(), ChannelError>;

    /// Block until the executor acknowledges; `true` when the build succeeded.
    fn await_response(&mut self) -> Result<bool, ChannelError>;
}

/// Decode a response byte.
pub fn decode_response(byte: u8) -> Result<bool, ChannelError> {
    match byte {
        RESPONSE_SUCCESS => Ok(true),
        RESPONSE_FAILURE => Ok(false),
        other => Err(ChannelError::BrokenResponse(other)),
    }
}

pub fn encode_response(succeeded: bool) -> u8 {
    if succeeded {
        RESPONSE_SUCCESS
    } else {
        RESPONSE_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_bytes() {
        assert!(decode_response(encode_response(true)).unwrap());
        assert!(!decode_response(encode_response(false)).unwrap());
        assert!(matches!(
            decode_response(0x7f),
            Err(ChannelError::BrokenResponse(0x7f))
        ));
    }
}
