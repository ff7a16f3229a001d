//! The sync server: accept loop, worker pools and lifecycle.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{FanOut, HandlerContext, RequestHandler};
use crate::peer::{Peer, PeerRegistry};
use hubsync_core::{
    Connection, ConnectionListener, Delivery, EntityStore, HandshakeLock, ListenerRole,
    PeerAddress, StopSignal, SyncError, Transport, UpdatePoller, WorkerPool,
};
use hubsync_protocol::Entity;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

/// Lifecycle of a [`SyncServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not running.
    Stopped,
    /// Opening the listener and spawning threads.
    Starting,
    /// Accepting connections.
    Running,
    /// Draining work.
    Stopping,
}

/// Everything owned by one run of the server.
struct Running {
    context: Arc<HandlerContext>,
    poller: Arc<UpdatePoller>,
    handlers: Arc<WorkerPool<Box<dyn Connection>>>,
    stop: StopSignal,
    threads: Vec<JoinHandle<()>>,
    local_address: Option<PeerAddress>,
}

impl Running {
    fn signal_stop(&self) {
        self.stop.stop();
        self.poller.stop_polling();
        self.context.lock.shutdown();
    }

    fn join(self, grace: Duration) {
        for handle in self.threads {
            if handle.join().is_err() {
                tracing::error!("server thread panicked");
            }
        }
        self.handlers.shutdown(grace);
        self.context.fanout.shutdown(grace);
    }
}

/// The hub of a sync star.
///
/// Each run starts with an empty peer registry: peers re-register by
/// handshaking again after a restart.
///
/// # Example
///
/// ```no_run
/// use hubsync_core::transport::{TcpTransport, TcpTransportConfig};
/// use hubsync_core::MemoryEntityStore;
/// use hubsync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let server = SyncServer::new(
///     Arc::new(MemoryEntityStore::new()),
///     Arc::new(TcpTransport::new(TcpTransportConfig::default())),
///     ServerConfig::default(),
/// );
/// server.start().unwrap();
/// // ...
/// server.stop(true).unwrap();
/// ```
pub struct SyncServer {
    store: Arc<dyn EntityStore>,
    transport: Arc<dyn Transport>,
    config: ServerConfig,
    state: Arc<Mutex<ServerState>>,
    running: Mutex<Option<Running>>,
}

impl SyncServer {
    /// Creates a stopped server.
    pub fn new(
        store: Arc<dyn EntityStore>,
        transport: Arc<dyn Transport>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            state: Arc::new(Mutex::new(ServerState::Stopped)),
            running: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Returns true while accepting connections.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Opens the listener and starts the accept loop and poller.
    ///
    /// A listener that cannot be opened fails the start with
    /// [`ServerError::Listener`] and leaves the server stopped.
    pub fn start(&self) -> ServerResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Stopped {
                return Err(ServerError::InvalidState(format!(
                    "cannot start while {:?}",
                    *state
                )));
            }
            *state = ServerState::Starting;
        }

        match self.launch() {
            Ok(running) => {
                tracing::info!(
                    transport = %self.transport.connection_type(),
                    address = ?running.local_address.as_ref().map(ToString::to_string),
                    "sync server running"
                );
                *self.running.lock() = Some(running);
                *self.state.lock() = ServerState::Running;
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "sync server failed to start");
                *self.state.lock() = ServerState::Stopped;
                Err(err)
            }
        }
    }

    fn launch(&self) -> ServerResult<Running> {
        let config = &self.config;
        let mut listener = self
            .transport
            .listener(ListenerRole::Server)
            .map_err(ServerError::Listener)?;
        listener.initialize().map_err(ServerError::Listener)?;
        let local_address = listener.local_address();

        let peers = Arc::new(PeerRegistry::new());
        let lock = Arc::new(HandshakeLock::new());
        let fanout = FanOut::new(
            Arc::clone(&peers),
            Arc::clone(&lock),
            self.transport.connector(),
            config.sender_workers,
            config.queue_capacity,
        )?;
        let context = Arc::new(HandlerContext {
            store: Arc::clone(&self.store),
            peers,
            lock,
            fanout,
            conflict_policy: config.conflict_policy,
        });

        let handler = RequestHandler::new(Arc::clone(&context));
        let handlers = Arc::new(WorkerPool::new(
            "hubsync-handler",
            config.handler_workers,
            config.queue_capacity,
            move |conn: Box<dyn Connection>| handler.handle_connection(conn),
        )?);

        let poller = {
            let context = Arc::clone(&context);
            Arc::new(UpdatePoller::new(
                Arc::clone(&self.store),
                Arc::new(move |entities: &[Entity]| broadcast_local(&context, entities)),
                config.poller,
            ))
        };

        let stop = StopSignal::new();
        let poller_thread = poller.spawn("hubsync-server-poller")?;
        let accept_thread = {
            let handlers = Arc::clone(&handlers);
            let stop = stop.clone();
            thread::Builder::new()
                .name("hubsync-accept".to_string())
                .spawn(move || accept_loop(listener, &handlers, &stop))
        };
        let accept_thread = match accept_thread {
            Ok(handle) => handle,
            Err(err) => {
                poller.stop_polling();
                let _ = poller_thread.join();
                return Err(err.into());
            }
        };

        Ok(Running {
            context,
            poller,
            handlers,
            stop,
            threads: vec![accept_thread, poller_thread],
            local_address,
        })
    }

    /// Stops accepting, stops the poller and releases blocked lock waiters.
    ///
    /// With `await_termination` the call returns once every thread has
    /// finished (bounded by the shutdown grace period); otherwise the
    /// teardown continues in the background and the state turns
    /// `Stopped` when it is done. Stopping a stopped server is a no-op.
    pub fn stop(&self, await_termination: bool) -> ServerResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ServerState::Running => *state = ServerState::Stopping,
                ServerState::Stopped => return Ok(()),
                other => {
                    return Err(ServerError::InvalidState(format!(
                        "cannot stop while {other:?}"
                    )))
                }
            }
        }

        let Some(running) = self.running.lock().take() else {
            *self.state.lock() = ServerState::Stopped;
            return Ok(());
        };
        running.signal_stop();

        let grace = self.config.shutdown_grace;
        let state = Arc::clone(&self.state);
        let teardown = move || {
            running.join(grace);
            *state.lock() = ServerState::Stopped;
            tracing::info!("sync server stopped");
        };

        if await_termination {
            teardown();
            return Ok(());
        }

        let fallback = Arc::clone(&self.state);
        thread::Builder::new()
            .name("hubsync-server-stop".to_string())
            .spawn(teardown)
            .map(|_| ())
            .map_err(|err| {
                *fallback.lock() = ServerState::Stopped;
                ServerError::Spawn(err)
            })
    }

    /// Queues `entities` for every active peer. Returns the number of
    /// peers queued.
    pub fn on_entities_available(&self, entities: &[Entity]) -> ServerResult<usize> {
        let context = self.context()?;
        Ok(context.fanout.broadcast(entities, None)?)
    }

    /// Wakes the poller for an immediate scan.
    pub fn sync_now(&self) {
        if let Some(running) = self.running.lock().as_ref() {
            running.poller.sync_now();
        }
    }

    /// Returns every known peer.
    pub fn peers(&self) -> Vec<Peer> {
        self.context().map(|c| c.peers.all()).unwrap_or_default()
    }

    /// Returns the peer with `unique_id`.
    pub fn peer(&self, unique_id: &str) -> Option<Peer> {
        self.context().ok()?.peers.get(unique_id)
    }

    /// The address the listener is bound to, while running.
    pub fn local_address(&self) -> Option<PeerAddress> {
        self.running
            .lock()
            .as_ref()
            .and_then(|r| r.local_address.clone())
    }

    /// Waits until no request is being handled and no push is queued.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let (handlers, context) = match self.running.lock().as_ref() {
            Some(r) => (Arc::clone(&r.handlers), Arc::clone(&r.context)),
            None => return true,
        };
        handlers.wait_idle(timeout) && context.fanout.wait_idle(timeout)
    }

    fn context(&self) -> ServerResult<Arc<HandlerContext>> {
        self.running
            .lock()
            .as_ref()
            .map(|r| Arc::clone(&r.context))
            .ok_or_else(|| ServerError::InvalidState("server is not running".into()))
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.signal_stop();
            running.join(self.config.shutdown_grace);
        }
    }
}

fn broadcast_local(context: &HandlerContext, entities: &[Entity]) -> Delivery {
    match context.fanout.broadcast(entities, None) {
        Ok(peers) => {
            tracing::debug!(count = entities.len(), peers, "local changes queued");
            Delivery::Delivered
        }
        Err(SyncError::Interrupted) => Delivery::Failed,
        Err(err) => {
            tracing::warn!(error = %err, "cannot queue local changes");
            Delivery::Failed
        }
    }
}

fn accept_loop(
    mut listener: Box<dyn ConnectionListener>,
    handlers: &WorkerPool<Box<dyn Connection>>,
    stop: &StopSignal,
) {
    while !stop.is_stopped() {
        match listener.accept() {
            Ok(conn) => {
                if let Err(err) = handlers.submit(conn) {
                    tracing::debug!(error = %err, "connection dropped");
                }
            }
            Err(SyncError::Timeout) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                stop.sleep(ACCEPT_BACKOFF);
            }
        }
    }
    listener.close();
    tracing::debug!("accept loop exited");
}
