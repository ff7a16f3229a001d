//! Inbound request handling and outbound fan-out.

use crate::peer::{Peer, PeerRegistry};
use hubsync_core::{
    apply_batch, unix_seconds, ApplySummary, Connection, Connector, EntityStore, HandshakeLock,
    LockKind, PeerAddress, SyncError, SyncResult, WorkerPool,
};
use hubsync_protocol::{ConflictPolicy, Entity, Request, RequestType, Response};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// One push of an encoded response to one peer.
pub(crate) struct SendTask {
    peer_id: String,
    address: PeerAddress,
    payload: Arc<[u8]>,
}

struct Outbound {
    peers: Arc<PeerRegistry>,
    lock: Arc<HandshakeLock>,
    connector: Arc<dyn Connector>,
}

impl Outbound {
    fn deliver(&self, task: SendTask) {
        // Held across connect and send so a slow peer only delays updates.
        let _guard = match self.lock.lock(LockKind::Update) {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(peer = %task.peer_id, "send dropped at shutdown");
                return;
            }
        };

        let sent = self.connector.connect(&task.address).and_then(|mut conn| {
            let result = conn.send_frame(&task.payload);
            conn.close();
            result
        });

        match sent {
            Ok(()) => {
                self.peers.touch(&task.peer_id, unix_seconds());
                tracing::trace!(peer = %task.peer_id, "update pushed");
            }
            Err(err) => {
                tracing::warn!(
                    peer = %task.peer_id,
                    address = %task.address,
                    error = %err,
                    "push failed, marking peer inactive"
                );
                if !self.peers.mark_inactive(&task.peer_id, &task.address) {
                    tracing::debug!(peer = %task.peer_id, "peer moved since the push was queued");
                }
            }
        }
    }
}

/// Queues pushes to active peers on a keyed worker pool.
///
/// Every push to one peer runs on the same worker, in order.
pub struct FanOut {
    peers: Arc<PeerRegistry>,
    pool: WorkerPool<SendTask>,
}

impl FanOut {
    pub(crate) fn new(
        peers: Arc<PeerRegistry>,
        lock: Arc<HandshakeLock>,
        connector: Arc<dyn Connector>,
        workers: usize,
        capacity: usize,
    ) -> io::Result<Self> {
        let outbound = Outbound {
            peers: Arc::clone(&peers),
            lock,
            connector,
        };
        let pool = WorkerPool::new("hubsync-send", workers, capacity, move |task: SendTask| {
            outbound.deliver(task)
        })?;
        Ok(Self { peers, pool })
    }

    /// Queues `entities` for every active peer except `exclude`. Returns
    /// the number of peers queued.
    pub fn broadcast(&self, entities: &[Entity], exclude: Option<&str>) -> SyncResult<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let payload: Arc<[u8]> = Response::new(entities.to_vec()).encode()?.into();

        let mut queued = 0;
        let mut failure = None;
        self.peers.for_each_active(exclude, |peer| {
            let task = SendTask {
                peer_id: peer.unique_id.clone(),
                address: peer.address.clone(),
                payload: Arc::clone(&payload),
            };
            match self.pool.submit_keyed(peer.unique_id.as_str(), task) {
                Ok(()) => queued += 1,
                Err(err) => failure = Some(err),
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(queued),
        }
    }

    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        self.pool.wait_idle(timeout)
    }

    pub(crate) fn shutdown(&self, grace: Duration) -> bool {
        self.pool.shutdown(grace)
    }
}

/// Context for request handling.
pub struct HandlerContext {
    /// The local store.
    pub store: Arc<dyn EntityStore>,
    /// Peers known to this server run.
    pub peers: Arc<PeerRegistry>,
    /// Keeps handshakes and sends apart.
    pub lock: Arc<HandshakeLock>,
    /// Outbound pushes.
    pub fanout: FanOut,
    /// How inbound records are reconciled.
    pub conflict_policy: ConflictPolicy,
}

/// Handler for inbound connections.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Reads one request from `conn`, handles it and closes the connection.
    ///
    /// Never fails: every error is logged here and scoped to this
    /// connection.
    pub fn handle_connection(&self, mut conn: Box<dyn Connection>) {
        let remote = conn.remote_address();
        let result = match conn.receive_request() {
            Ok(Some(request)) => match request.request_type {
                RequestType::Handshake => self
                    .handle_handshake(conn.as_mut(), &request.sender_id)
                    .map(|_| ()),
                RequestType::Update => self.handle_update(request).map(|_| ()),
            },
            Ok(None) => {
                tracing::debug!(remote = %remote, "connection closed before a request");
                Ok(())
            }
            Err(err) => Err(err),
        };
        conn.close();

        match result {
            Ok(()) => {}
            Err(SyncError::Interrupted) => {
                tracing::debug!(remote = %remote, "request abandoned at shutdown");
            }
            Err(SyncError::Timeout) => {
                tracing::debug!(remote = %remote, "request timed out");
            }
            Err(err @ SyncError::Protocol(_)) => {
                tracing::warn!(remote = %remote, error = %err, "dropping malformed request");
            }
            Err(err) => {
                tracing::warn!(remote = %remote, error = %err, "request failed");
            }
        }
    }

    /// Registers the sender and sends it a snapshot of every transmittable
    /// record. Returns the snapshot size.
    pub fn handle_handshake(&self, conn: &mut dyn Connection, sender_id: &str) -> SyncResult<usize> {
        let ctx = &self.context;
        let _guard = ctx.lock.lock(LockKind::Handshake)?;

        let address = conn.remote_address();
        let is_new = ctx.peers.upsert(Peer::new(sender_id, address.clone()));

        let mut snapshot = ctx.store.all_entities()?;
        ctx.store.resolve_global_ids(&mut snapshot)?;
        snapshot.retain(Entity::is_transmittable);
        let count = snapshot.len();

        if let Err(err) = conn.send_response(&Response::new(snapshot)) {
            ctx.peers.mark_inactive(sender_id, &address);
            return Err(err);
        }

        tracing::info!(
            peer = %sender_id,
            address = %address,
            new = is_new,
            snapshot = count,
            "peer handshaked"
        );
        Ok(count)
    }

    /// Applies a peer's batch and forwards it to every other active peer.
    pub fn handle_update(&self, request: Request) -> SyncResult<ApplySummary> {
        let ctx = &self.context;
        let _guard = ctx.lock.lock(LockKind::Update)?;

        let summary = apply_batch(ctx.store.as_ref(), &request.entities, ctx.conflict_policy);
        let forwarded = ctx
            .fanout
            .broadcast(&request.entities, Some(&request.sender_id))?;

        tracing::debug!(
            peer = %request.sender_id,
            received = request.entities.len(),
            changed = summary.changed(),
            failed = summary.failed,
            forwarded,
            "update applied"
        );
        Ok(summary)
    }
}
