//! The spoke side of a sync star.

use crate::config::ClientConfig;
use crate::error::{EngineError, EngineResult};
use hubsync_core::{
    apply_batch, ConnectionListener, Connector, Delivery, EntityStore, ListenerRole, PeerAddress,
    StopSignal, SyncError, SyncResult, Transport, UpdatePoller,
};
use hubsync_protocol::{ConflictPolicy, Entity, Request};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`SyncClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not running.
    Stopped,
    /// Exchanging the initial snapshot.
    Handshaking,
    /// Pushing local changes and receiving the hub's.
    Running,
    /// Shutting down.
    Stopping,
}

impl ClientState {
    /// Returns true between a successful start and the end of a stop.
    pub fn is_active(&self) -> bool {
        matches!(self, ClientState::Handshaking | ClientState::Running)
    }
}

struct ClientRun {
    poller: Arc<UpdatePoller>,
    stop: StopSignal,
    threads: Vec<JoinHandle<()>>,
}

impl ClientRun {
    /// Joins the threads, giving up on any still busy after `grace`.
    ///
    /// A thread left behind is parked in a connect or read and exits on
    /// its own once that times out.
    fn join(self, grace: Duration) {
        self.stop.stop();
        self.poller.stop_polling();

        let deadline = Instant::now() + grace;
        for handle in self.threads {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if !handle.is_finished() {
                tracing::warn!(
                    thread = handle.thread().name().unwrap_or("client"),
                    ?grace,
                    "client thread still busy after grace period, detaching"
                );
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("client thread panicked");
            }
        }
    }
}

/// Connects to a hub, takes its snapshot, then keeps both sides current.
///
/// A failed handshake fails [`start`](Self::start); it is not retried.
pub struct SyncClient {
    store: Arc<dyn EntityStore>,
    transport: Arc<dyn Transport>,
    server: PeerAddress,
    config: ClientConfig,
    state: Arc<Mutex<ClientState>>,
    running: Mutex<Option<ClientRun>>,
}

impl SyncClient {
    /// Creates a stopped client that will sync with the hub at `server`.
    pub fn new(
        store: Arc<dyn EntityStore>,
        transport: Arc<dyn Transport>,
        server: PeerAddress,
        config: ClientConfig,
    ) -> Self {
        Self {
            store,
            transport,
            server,
            config,
            state: Arc::new(Mutex::new(ClientState::Stopped)),
            running: Mutex::new(None),
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Returns true while running.
    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    /// The hub this client syncs with.
    pub fn server_address(&self) -> &PeerAddress {
        &self.server
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens the push listener, handshakes and starts the background
    /// threads. Returns the number of snapshot records applied.
    pub fn start(&self) -> EngineResult<usize> {
        {
            let mut state = self.state.lock();
            if *state != ClientState::Stopped {
                return Err(EngineError::InvalidState(format!(
                    "cannot start while {:?}",
                    *state
                )));
            }
            *state = ClientState::Handshaking;
        }

        match self.launch() {
            Ok((run, applied)) => {
                *self.running.lock() = Some(run);
                *self.state.lock() = ClientState::Running;
                tracing::info!(server = %self.server, snapshot = applied, "sync client running");
                Ok(applied)
            }
            Err(err) => {
                tracing::error!(server = %self.server, error = %err, "sync client failed to start");
                *self.state.lock() = ClientState::Stopped;
                Err(err)
            }
        }
    }

    fn launch(&self) -> EngineResult<(ClientRun, usize)> {
        // Listen before handshaking: the hub may push as soon as it has
        // registered us.
        let mut listener = self
            .transport
            .listener(ListenerRole::Client)
            .map_err(EngineError::Listener)?;
        listener.initialize().map_err(EngineError::Listener)?;

        let connector = self.transport.connector();
        let applied = match self.handshake(connector.as_ref()) {
            Ok(applied) => applied,
            Err(err) => {
                listener.close();
                return Err(EngineError::Handshake(err));
            }
        };

        let pusher = Pusher {
            connector,
            server: self.server.clone(),
            unique_id: self.config.unique_id.clone(),
        };
        let poller = Arc::new(UpdatePoller::new(
            Arc::clone(&self.store),
            Arc::new(move |entities: &[Entity]| pusher.push(entities)),
            self.config.poller,
        ));

        let stop = StopSignal::new();
        let poller_thread = poller.spawn("hubsync-client-poller")?;
        let receiver = {
            let store = Arc::clone(&self.store);
            let stop = stop.clone();
            let policy = self.config.conflict_policy;
            thread::Builder::new()
                .name("hubsync-receiver".to_string())
                .spawn(move || receive_loop(listener, store.as_ref(), policy, &stop))
        };
        let receiver_thread = match receiver {
            Ok(handle) => handle,
            Err(err) => {
                poller.stop_polling();
                let _ = poller_thread.join();
                return Err(err.into());
            }
        };

        Ok((
            ClientRun {
                poller,
                stop,
                threads: vec![receiver_thread, poller_thread],
            },
            applied,
        ))
    }

    fn handshake(&self, connector: &dyn Connector) -> SyncResult<usize> {
        let mut conn = connector.connect(&self.server)?;
        let result = conn
            .send_request(&Request::handshake(self.config.unique_id.as_str()))
            .and_then(|()| conn.receive_response());
        conn.close();

        let snapshot = result?.ok_or(SyncError::NotConnected)?;
        let summary = apply_batch(
            self.store.as_ref(),
            &snapshot.entities,
            self.config.conflict_policy,
        );
        tracing::debug!(
            received = snapshot.entities.len(),
            changed = summary.changed(),
            failed = summary.failed,
            "snapshot applied"
        );
        Ok(snapshot.entities.len())
    }

    /// Stops the poller and receiver.
    ///
    /// With `await_termination` the call returns once both threads have
    /// exited; otherwise they are joined in the background. Stopping a
    /// stopped client is a no-op.
    pub fn stop(&self, await_termination: bool) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ClientState::Running => *state = ClientState::Stopping,
                ClientState::Stopped => return Ok(()),
                other => {
                    return Err(EngineError::InvalidState(format!(
                        "cannot stop while {other:?}"
                    )))
                }
            }
        }

        let Some(run) = self.running.lock().take() else {
            *self.state.lock() = ClientState::Stopped;
            return Ok(());
        };
        run.stop.stop();
        run.poller.stop_polling();

        let grace = self.config.shutdown_grace;
        let state = Arc::clone(&self.state);
        let teardown = move || {
            run.join(grace);
            *state.lock() = ClientState::Stopped;
            tracing::info!("sync client stopped");
        };

        if await_termination {
            teardown();
            return Ok(());
        }

        let fallback = Arc::clone(&self.state);
        thread::Builder::new()
            .name("hubsync-client-stop".to_string())
            .spawn(teardown)
            .map(|_| ())
            .map_err(|err| {
                *fallback.lock() = ClientState::Stopped;
                EngineError::Spawn(err)
            })
    }

    /// Wakes the poller for an immediate push.
    pub fn sync_now(&self) {
        if let Some(run) = self.running.lock().as_ref() {
            run.poller.sync_now();
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut().take() {
            run.join(self.config.shutdown_grace);
        }
    }
}

/// Sends local batches to the hub, one fresh connection per push.
struct Pusher {
    connector: Arc<dyn Connector>,
    server: PeerAddress,
    unique_id: String,
}

impl Pusher {
    fn push(&self, entities: &[Entity]) -> Delivery {
        let request = Request::update(self.unique_id.as_str(), entities.to_vec());
        let sent = self.connector.connect(&self.server).and_then(|mut conn| {
            let result = conn.send_request(&request);
            conn.close();
            result
        });

        match sent {
            Ok(()) => {
                tracing::debug!(count = entities.len(), "local changes pushed");
                Delivery::Delivered
            }
            Err(err) => {
                tracing::warn!(server = %self.server, error = %err, "push failed, will retry");
                Delivery::Failed
            }
        }
    }
}

fn receive_loop(
    mut listener: Box<dyn ConnectionListener>,
    store: &dyn EntityStore,
    policy: ConflictPolicy,
    stop: &StopSignal,
) {
    while !stop.is_stopped() {
        let mut conn = match listener.accept() {
            Ok(conn) => conn,
            Err(SyncError::Timeout) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                stop.sleep(ACCEPT_BACKOFF);
                continue;
            }
        };

        loop {
            match conn.receive_response() {
                Ok(Some(response)) => {
                    let summary = apply_batch(store, &response.entities, policy);
                    tracing::debug!(
                        received = response.entities.len(),
                        changed = summary.changed(),
                        failed = summary.failed,
                        "update from server applied"
                    );
                }
                Ok(None) => break,
                Err(SyncError::Timeout) => {
                    tracing::debug!("server push timed out");
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "bad push from server");
                    break;
                }
            }
        }
        conn.close();
    }
    listener.close();
    tracing::debug!("receiver loop exited");
}
