//! Live server: HTTP routes, push listener and push hub.
//!
//! # Module Structure
//!
//! - `http` - tiny_http routes (shell, client scripts, artifact, resources)
//! - `listener` - WebSocket accept loop for `/watcher`
//! - `hub` - connected clients, broadcast actor, client read loop
//! - `message` - push-channel wire messages

mod http;
mod hub;
mod listener;
mod message;

pub use http::ServerMode;
pub use hub::{ClientMessage, ClientPayload, HubActor, HubMsg, PushHub};
pub use listener::PUSH_PATH;
pub use message::{ClientEvent, OutputChunk, OutputStream};

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam::channel::{self, Receiver};
use tokio::sync::mpsc;

use crate::log;
use crate::session::Shutdown;

/// Channel buffer size
pub const CHANNEL_BUFFER: usize = 32;

/// How to run a live server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: IpAddr,
    pub port: u16,
    /// Host name clients use to reach us
    pub host: String,
    pub ws_port: u16,
    pub mode: ServerMode,
    pub title: String,
    pub artifact: PathBuf,
    pub resources: Vec<PathBuf>,
    pub custom_index_page: Option<PathBuf>,
}

/// A running live server.
///
/// Cancelling the session's [`Shutdown`] unblocks the request loop and
/// stops the hub; [`LiveServer::wait`] then returns.
pub struct LiveServer {
    addr: SocketAddr,
    url: String,
    hub_tx: mpsc::Sender<HubMsg>,
    events: Receiver<ClientMessage>,
    request_loop: JoinHandle<Result<()>>,
}

impl LiveServer {
    /// Bind both listeners and start serving. Must be called within a tokio
    /// runtime; the hub actor is spawned onto it.
    pub fn start(options: ServerOptions, shutdown: &Shutdown) -> Result<Self> {
        let hub = PushHub::new();
        let (hub_tx, hub_rx) = mpsc::channel::<HubMsg>(CHANNEL_BUFFER);
        tokio::spawn(HubActor::new(hub_rx, hub.clone()).run());

        let ws_port =
            listener::start_listener(options.bind, options.ws_port, hub_tx.clone(), shutdown.clone())?;
        let push_url = format!("ws://{}:{}{}", options.host, ws_port, PUSH_PATH);
        crate::debug!("ws"; "{}", push_url);

        let (events_tx, events) = channel::unbounded();
        hub.spawn_reader(events_tx, shutdown.clone());

        let (server, addr) = http::bind_with_retry(options.bind, options.port)?;
        let server = Arc::new(server);
        let url = format!("http://{}:{}", options.host, addr.port());

        let routes = Arc::new(http::Routes {
            mode: options.mode,
            title: options.title,
            artifact: options.artifact,
            resources: options.resources,
            custom_index_page: options.custom_index_page,
            push_url,
        });

        {
            let server = Arc::clone(&server);
            let hub_tx = hub_tx.clone();
            shutdown.on_cancel(move || {
                server.unblock();
                let _ = hub_tx.try_send(HubMsg::Shutdown);
            });
        }

        let request_loop = {
            let shutdown = shutdown.clone();
            thread::spawn(move || http::run_request_loop(&server, routes, shutdown))
        };

        log!("serve"; "{}", url);
        Ok(Self {
            addr,
            url,
            hub_tx,
            events,
            request_loop,
        })
    }

    /// Address clients should open.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sender for build outcomes (and new clients).
    pub fn hub_sender(&self) -> mpsc::Sender<HubMsg> {
        self.hub_tx.clone()
    }

    /// Messages received from clients.
    pub fn events(&self) -> Receiver<ClientMessage> {
        self.events.clone()
    }

    /// Block until the request loop has stopped.
    pub fn wait(self) -> Result<()> {
        self.request_loop
            .join()
            .map_err(|_| anyhow::anyhow!("request loop panicked"))?
    }
}
