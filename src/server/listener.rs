//! WebSocket listener for the push channel.
//!
//! Accepts connections on its own port, performs the handshake on a short
//! lived thread, and hands ready clients to the hub actor.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tungstenite::WebSocket;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::{Message, WebSocketConfig};

use super::hub::{HubMsg, Incoming, PushSink};
use crate::diagnostics::TraceFormat;
use crate::session::Shutdown;

/// Upgrade path of the push channel.
pub const PUSH_PATH: &str = "/watcher";

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Frames queued for one client beyond this fail the send.
const MAX_WRITE_BUFFER: usize = 16 << 20;

/// A client that accepts no bytes for this long is dropped.
const SEND_STALL_TIMEOUT: Duration = Duration::from_secs(10);

fn push_config() -> WebSocketConfig {
    WebSocketConfig::default().max_write_buffer_size(MAX_WRITE_BUFFER)
}

/// WebSocket client in non-blocking mode.
pub struct WsSink {
    ws: WebSocket<TcpStream>,
    /// Set while buffered frames cannot be written out
    stalled_since: Option<Instant>,
    stall_timeout: Duration,
}

impl WsSink {
    fn new(ws: WebSocket<TcpStream>, stall_timeout: Duration) -> Self {
        Self {
            ws,
            stalled_since: None,
            stall_timeout,
        }
    }

    /// Track whether buffered frames are draining.
    ///
    /// `WouldBlock` keeps the frames queued; it only becomes an error once
    /// the peer has accepted nothing for `stall_timeout`.
    fn settle(&mut self, result: tungstenite::Result<()>) -> Result<(), String> {
        match result {
            Ok(()) => {
                self.stalled_since = None;
                Ok(())
            }
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                let since = *self.stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.stall_timeout {
                    Err(format!("client accepted no data for {:?}", self.stall_timeout))
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

impl PushSink for WsSink {
    fn send_text(&mut self, text: &str) -> Result<(), String> {
        let result = self.ws.send(Message::Text(text.into()));
        self.settle(result)
    }

    fn poll(&mut self) -> Incoming {
        match self.ws.read() {
            Ok(Message::Text(text)) => Incoming::Text(text.as_str().to_string()),
            Ok(Message::Binary(data)) => Incoming::Binary(data.to_vec()),
            Ok(Message::Close(_)) => Incoming::Closed,
            Ok(_) => Incoming::Idle,
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                // Push out buffered frames between reads
                let flushed = self.ws.flush();
                match self.settle(flushed) {
                    Ok(()) => Incoming::Idle,
                    Err(e) => {
                        crate::debug!("ws"; "{}", e);
                        Incoming::Closed
                    }
                }
            }
            Err(_) => Incoming::Closed,
        }
    }

    fn close(&mut self) {
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
    }
}

/// Bind the push listener and start accepting. Returns the bound port.
pub fn start_listener(
    bind: IpAddr,
    base_port: u16,
    hub_tx: mpsc::Sender<HubMsg>,
    shutdown: Shutdown,
) -> Result<u16> {
    let (listener, actual_port) = try_bind_port(bind, base_port, MAX_PORT_RETRIES)?;
    listener.set_nonblocking(true)?;

    thread::spawn(move || {
        while !shutdown.is_cancelled() {
            match listener.accept() {
                Ok((stream, addr)) => {
                    crate::debug!("ws"; "connection from {}", addr);
                    let tx = hub_tx.clone();
                    thread::spawn(move || handshake(stream, tx));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    crate::log!("ws"; "accept error: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    });

    Ok(actual_port)
}

fn handshake(stream: TcpStream, hub_tx: mpsc::Sender<HubMsg>) {
    // Blocking with a timeout during the handshake, non-blocking afterwards
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT));

    let mut user_agent = None;
    let callback = |request: &Request, response: Response| {
        check_upgrade(request, &mut user_agent).map(|()| response)
    };

    match tungstenite::accept_hdr_with_config(stream, callback, Some(push_config())) {
        Ok(ws) => {
            let _ = ws.get_ref().set_read_timeout(None);
            let _ = ws.get_ref().set_nonblocking(true);

            let format = user_agent.as_deref().and_then(TraceFormat::from_user_agent);
            crate::debug!("ws"; "client user agent: {:?}", user_agent);
            if hub_tx
                .blocking_send(HubMsg::AddClient(
                    Box::new(WsSink::new(ws, SEND_STALL_TIMEOUT)),
                    format,
                ))
                .is_err()
            {
                crate::debug!("ws"; "hub stopped, dropping client");
            }
        }
        Err(e) => {
            crate::debug!("ws"; "handshake failed: {}", e);
        }
    }
}

/// Accept only upgrades on [`PUSH_PATH`], capturing the `User-Agent`.
fn check_upgrade(request: &Request, user_agent: &mut Option<String>) -> Result<(), ErrorResponse> {
    if request.uri().path() != PUSH_PATH {
        let mut response = ErrorResponse::new(Some(format!("use {PUSH_PATH}")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Err(response);
    }
    *user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok(())
}

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(bind: IpAddr, base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(SocketAddr::new(bind, port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                if offset > 0 {
                    crate::log!("ws"; "port {} in use, using {} instead", base_port, actual_port);
                }
                return Ok((listener, actual_port));
            }
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to bind WebSocket server after {} attempts: {}",
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn request(path: &str, agent: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(agent) = agent {
            builder = builder.header("User-Agent", agent);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_upgrade_path_checked() {
        let mut agent = None;
        let err = check_upgrade(&request("/other", None), &mut agent).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let ua = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
        check_upgrade(&request(PUSH_PATH, Some(ua)), &mut agent).unwrap();
        assert_eq!(agent.as_deref(), Some(ua));
        assert_eq!(
            agent.as_deref().and_then(TraceFormat::from_user_agent),
            Some(TraceFormat::SpiderMonkey)
        );
    }

    #[test]
    fn test_try_bind_port_skips_busy_port() {
        let busy = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let (_listener, port) =
            try_bind_port(IpAddr::V4(Ipv4Addr::LOCALHOST), busy_port, 10).unwrap();
        assert_ne!(port, busy_port);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_handshake_registers_with_hub() {
        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = Shutdown::new();
        let port = start_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, tx, shutdown.clone())
            .unwrap();

        let url = format!("ws://127.0.0.1:{port}{PUSH_PATH}");
        let client = tokio::task::spawn_blocking(move || tungstenite::connect(url.as_str()));

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(msg, HubMsg::AddClient(_, _)));
        let _ = client.await.unwrap().unwrap();
        shutdown.cancel();
    }

    /// A server-side sink whose peer completed the handshake and never reads.
    fn silent_peer(config: WebSocketConfig, stall_timeout: Duration) -> (WsSink, WebSocket<TcpStream>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            let url = format!("ws://{addr}{PUSH_PATH}");
            tungstenite::client(url.as_str(), stream).unwrap().0
        });

        let (stream, _) = listener.accept().unwrap();
        let ws = tungstenite::accept_with_config(stream, Some(config)).unwrap();
        ws.get_ref().set_nonblocking(true).unwrap();
        (WsSink::new(ws, stall_timeout), client.join().unwrap())
    }

    #[test]
    fn test_full_write_buffer_fails_send() {
        let config = WebSocketConfig::default().max_write_buffer_size(512 * 1024);
        let (mut sink, _peer) = silent_peer(config, Duration::from_secs(60));

        let payload = "x".repeat(64 * 1024);
        let failed = (0..4000).any(|_| sink.send_text(&payload).is_err());
        assert!(failed, "send kept succeeding for a peer that never reads");
    }

    #[test]
    fn test_stalled_peer_is_closed_after_timeout() {
        let (mut sink, _peer) = silent_peer(push_config(), Duration::from_millis(200));

        let payload = "x".repeat(64 * 1024);
        for _ in 0..4000 {
            sink.send_text(&payload).unwrap();
            if sink.stalled_since.is_some() {
                break;
            }
        }
        assert!(sink.stalled_since.is_some());
        assert!(matches!(sink.poll(), Incoming::Idle));

        thread::sleep(Duration::from_millis(250));
        assert!(matches!(sink.poll(), Incoming::Closed));
    }
}
