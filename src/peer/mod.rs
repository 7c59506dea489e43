//! High-level peer connection.
//!
//! [`Peer`] owns one outbound TCP connection to a node: it dials, performs
//! the version handshake, runs a background read loop that reassembles and
//! dispatches inbound messages, fans events out to subscribers, and
//! correlates async operations (ping, header fetch, block fetch,
//! transaction broadcast) with the interleaved inbound stream.
//!
//! # Examples
//!
//! ```no_run
//! use bsv_peers::{Network, Peer, PeerConfiguration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PeerConfiguration::new(Network::Bsv);
//! let peer = Peer::new("seed.satoshisvision.network:8333", config);
//!
//! // Establish the connection with automatic handshake.
//! peer.connect().await?;
//!
//! // Measure round-trip time.
//! let elapsed = peer.ping().await?;
//! println!("pong after {elapsed:?}");
//!
//! peer.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod configuration;
mod error;
mod events;
mod handshake;
mod pending;
mod state;

pub use configuration::{
    PeerConfiguration, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_CAPACITY, DEFAULT_HEADERS_TIMEOUT,
    MAX_BROADCAST_PER_MESSAGE, RECONNECT_DELAY,
};
pub use error::PeerError;
pub use events::{BlockChunkInfo, BlockSummary, PeerEvent, TransactionBatch};
pub use state::LifecycleState;

use crate::chain::{Block, BlockHeader, BlockProgress, Hash256, Transaction};
use crate::messages::{headers, inv, version::DEFAULT_SERVICES};
use crate::messages::{Command, Inventory, NetworkAddress, Reject, Version};
use crate::messages::address::read_addr;
use crate::network::{Network, EXTENDED_MESSAGES_MIN_PROTOCOL_VERSION};
use crate::transport::{envelope, Frame, Inbound, Reassembler};
use log::{debug, error, info};
use pending::{OpKey, OpOutcome, OpResponder, PendingOperation, PendingOperations};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Why a connection is being torn down. Decides what a pending connect
/// operation hears; every other pending operation hears
/// [`PeerError::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectReason {
    /// The connect deadline elapsed before the handshake completed.
    Timeout,
    /// A socket operation failed.
    Socket,
    /// The peer closed the stream.
    PeerClosed,
    /// The peer sent data that failed to parse; its protocol state is no
    /// longer trustworthy.
    Protocol,
    /// The local side asked to disconnect.
    Requested,
}

/// A connection to one remote node.
///
/// Cheap to clone; all clones share the same underlying connection. The
/// connection owns its socket exclusively and processes its inbound stream
/// strictly sequentially; independent `Peer` instances share no state.
#[derive(Debug, Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

#[derive(Debug)]
struct PeerInner {
    /// Remote node as `host:port`.
    address: String,
    /// Magic prefix every envelope must carry.
    magic: [u8; 4],
    configuration: PeerConfiguration,
    state: Mutex<LifecycleState>,
    pending: Mutex<PendingOperations>,
    /// Write half of the socket; present while connected.
    writer: Mutex<Option<OwnedWriteHalf>>,
    events: broadcast::Sender<PeerEvent>,
    /// Wakes the read loop during teardown.
    shutdown: Notify,
    /// Bumped on every teardown so a stale read loop can tell it is stale.
    generation: AtomicU64,
    /// Whether the extended message format is active for this session.
    extended_messages: AtomicBool,
    auto_reconnect: AtomicBool,
    listen_transactions: AtomicBool,
    listen_blocks: AtomicBool,
    disconnects: AtomicU64,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Create a peer handle for the node at `address` (`host:port`).
    ///
    /// No socket is opened until [`Peer::connect`] is called.
    pub fn new(address: impl Into<String>, configuration: PeerConfiguration) -> Self {
        let (events, _) = broadcast::channel(configuration.event_capacity);
        let magic = configuration
            .magic
            .unwrap_or_else(|| configuration.network.magic());
        let auto_reconnect = configuration.auto_reconnect;
        Peer {
            inner: Arc::new(PeerInner {
                address: address.into(),
                magic,
                configuration,
                state: Mutex::new(LifecycleState::Disconnected),
                pending: Mutex::new(PendingOperations::new()),
                writer: Mutex::new(None),
                events,
                shutdown: Notify::new(),
                generation: AtomicU64::new(0),
                extended_messages: AtomicBool::new(false),
                auto_reconnect: AtomicBool::new(auto_reconnect),
                listen_transactions: AtomicBool::new(false),
                listen_blocks: AtomicBool::new(false),
                disconnects: AtomicU64::new(0),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// The remote node's `host:port`.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// The configured network.
    pub fn network(&self) -> Network {
        self.inner.configuration.network
    }

    /// Subscribe to the connection's event stream.
    ///
    /// Every subscriber sees every subsequent event. A subscriber that
    /// falls behind by more than the configured channel capacity misses
    /// events rather than stalling the connection.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        *self.inner.state.lock().await
    }

    /// Cumulative number of disconnects over this handle's lifetime.
    pub fn disconnect_count(&self) -> u64 {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Whether the extended message format is active for the current
    /// session.
    pub fn extended_messages_enabled(&self) -> bool {
        self.inner.extended_messages.load(Ordering::SeqCst)
    }

    /// Number of operations currently awaiting a peer response.
    pub async fn outstanding_requests(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Automatically request announced transactions with `getdata` while
    /// transaction subscribers exist.
    pub fn listen_for_transactions(&self, enabled: bool) {
        self.inner
            .listen_transactions
            .store(enabled, Ordering::SeqCst);
    }

    /// Automatically request announced blocks with `getdata` while
    /// transaction subscribers exist.
    pub fn listen_for_blocks(&self, enabled: bool) {
        self.inner.listen_blocks.store(enabled, Ordering::SeqCst);
    }

    /// Connect and complete the version handshake.
    ///
    /// Resolves once the peer's `verack` is observed. Concurrent callers
    /// share the same attempt. The whole sequence runs under the
    /// configured connect timeout; any failure before readiness rejects
    /// with the terminal reason.
    pub async fn connect(&self) -> Result<(), PeerError> {
        let (receiver, dial) = {
            let mut state = self.inner.state.lock().await;
            match *state {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::Disconnected => {
                    *state = LifecycleState::Connecting;
                    (self.inner.register_connect_waiter().await, true)
                }
                _ => (self.inner.register_connect_waiter().await, false),
            }
        };

        if dial {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_connect().await });
        }

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Disconnected),
        }
    }

    /// Disconnect and stay down.
    ///
    /// Turns automatic reconnection off permanently and cancels a
    /// scheduled reconnect attempt. Every outstanding operation is
    /// rejected with [`PeerError::Disconnected`].
    pub async fn disconnect(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.reconnect_task.lock().await.take() {
            task.abort();
        }
        Arc::clone(&self.inner)
            .teardown(DisconnectReason::Requested)
            .await;
    }

    /// Measure round-trip time with a `ping`.
    ///
    /// Resolves with the elapsed time when the matching `pong` arrives.
    /// Deliberately carries no timeout, mirroring the reference client: an
    /// unanswered ping stays pending until the connection drops.
    pub async fn ping(&self) -> Result<Duration, PeerError> {
        let nonce = handshake::generate_nonce().to_le_bytes();
        let receiver = self
            .inner
            .register_operation(OpKey::Pong(nonce), None)
            .await?;
        let started = Instant::now();
        if let Err(err) = self.inner.send_message(Command::Ping, &nonce, false).await {
            self.inner.remove_operation(OpKey::Pong(nonce)).await;
            return Err(err);
        }
        match receiver.await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(PeerError::Disconnected),
        }
    }

    /// Fetch block headers following the `locators`.
    ///
    /// Only one header fetch may be outstanding at a time; a concurrent
    /// second call fails immediately with [`PeerError::RequestPending`].
    /// Times out with [`PeerError::Timeout`] after the configured headers
    /// timeout.
    pub async fn get_headers(
        &self,
        locators: &[Hash256],
        stop: Option<Hash256>,
    ) -> Result<Vec<BlockHeader>, PeerError> {
        let receiver = self.inner.register_operation(OpKey::Headers, None).await?;
        let payload =
            headers::write_get_headers(self.inner.protocol_version(), locators, stop);
        if let Err(err) = self
            .inner
            .send_message(Command::GetHeaders, &payload, false)
            .await
        {
            self.inner.remove_operation(OpKey::Headers).await;
            return Err(err);
        }
        match tokio::time::timeout(self.inner.configuration.headers_timeout, receiver).await {
            Ok(Ok(Ok(OpOutcome::Headers(headers)))) => Ok(headers),
            Ok(Ok(Ok(_))) => Err(PeerError::Disconnected),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(PeerError::Disconnected),
            Err(_) => {
                self.inner.remove_operation(OpKey::Headers).await;
                Err(PeerError::Timeout)
            }
        }
    }

    /// Fetch one block by hash.
    ///
    /// Races the peer's response: a block completes the fetch, a
    /// `notfound` naming the hash rejects it with [`PeerError::NotFound`].
    /// With streaming enabled the summary's transaction list is empty and
    /// the transactions are delivered through
    /// [`PeerEvent::Transactions`] as they decode.
    pub async fn get_block(&self, hash: Hash256) -> Result<BlockSummary, PeerError> {
        let receiver = self
            .inner
            .register_operation(OpKey::Block(hash), None)
            .await?;
        if let Err(err) = self.request_blocks(&[hash]).await {
            self.inner.remove_operation(OpKey::Block(hash)).await;
            return Err(err);
        }
        match receiver.await {
            Ok(Ok(OpOutcome::Block(summary))) => Ok(summary),
            Ok(Ok(_)) => Err(PeerError::Disconnected),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(PeerError::Disconnected),
        }
    }

    /// Request blocks with `getdata`, without waiting for them.
    pub async fn request_blocks(&self, hashes: &[Hash256]) -> Result<(), PeerError> {
        let payload = inv::write(hashes, inv::INV_BLOCK);
        self.inner
            .send_message(Command::GetData, &payload, false)
            .await
    }

    /// Request transactions with `getdata`, without waiting for them.
    pub async fn request_transactions(&self, hashes: &[Hash256]) -> Result<(), PeerError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let payload = inv::write(hashes, inv::INV_TRANSACTION);
        self.inner
            .send_message(Command::GetData, &payload, false)
            .await
    }

    /// Broadcast one raw transaction. See [`Peer::broadcast_transactions`].
    pub async fn broadcast_transaction(&self, raw: Vec<u8>) -> Result<(), PeerError> {
        self.broadcast_transactions(vec![raw]).await
    }

    /// Broadcast raw transactions.
    ///
    /// Announces the batch via `inv` and resolves once the peer requests
    /// one of the transactions with `getdata` and the full bytes have been
    /// sent. Transactions the peer never requests are simply never sent;
    /// their table entries die with the connection. Fails with
    /// [`PeerError::TooManyItems`] above the per-message cap, before any
    /// network activity.
    pub async fn broadcast_transactions(
        &self,
        raw_transactions: Vec<Vec<u8>>,
    ) -> Result<(), PeerError> {
        if raw_transactions.len() > MAX_BROADCAST_PER_MESSAGE {
            return Err(PeerError::TooManyItems {
                count: raw_transactions.len(),
                max: MAX_BROADCAST_PER_MESSAGE,
            });
        }
        let mut batch = Vec::with_capacity(raw_transactions.len());
        for raw in raw_transactions {
            let transaction = Transaction::from_bytes(&raw)?;
            batch.push((transaction.hash(), raw));
        }
        let hashes: Vec<Hash256> = batch.iter().map(|(hash, _)| *hash).collect();

        let receiver = self.inner.register_broadcast(batch).await?;
        let payload = inv::write(&hashes, inv::INV_TRANSACTION);
        if let Err(err) = self.inner.send_message(Command::Inv, &payload, false).await {
            for hash in &hashes {
                self.inner
                    .remove_operation(OpKey::TransactionRequest(*hash))
                    .await;
            }
            return Err(err);
        }
        match receiver.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(PeerError::Disconnected),
        }
    }

    /// Ask the peer to announce its mempool contents.
    pub async fn request_mempool(&self) -> Result<(), PeerError> {
        self.inner.send_message(Command::Mempool, &[], false).await
    }

    /// Ask the peer for known addresses; results arrive as
    /// [`PeerEvent::Addresses`].
    pub async fn request_addresses(&self) -> Result<(), PeerError> {
        self.inner.send_message(Command::GetAddr, &[], false).await
    }

    /// Send an arbitrary command and payload.
    ///
    /// Escape hatch for protocol messages without a dedicated operation.
    pub async fn send_message(&self, command: Command, payload: &[u8]) -> Result<(), PeerError> {
        self.inner.send_message(command, payload, false).await
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .inner
            .state
            .try_lock()
            .map(|state| state.to_string())
            .unwrap_or_else(|_| "<busy>".to_string());
        write!(
            f,
            "{} peer {} ({state})",
            self.inner.configuration.network, self.inner.address
        )
    }
}

impl PeerInner {
    /// Protocol version to advertise.
    fn protocol_version(&self) -> u32 {
        self.configuration
            .protocol_version
            .unwrap_or_else(|| self.configuration.network.protocol_version())
    }

    /// User agent to advertise.
    fn user_agent(&self) -> String {
        self.configuration
            .user_agent
            .clone()
            .unwrap_or_else(|| self.configuration.network.user_agent().to_string())
    }

    fn emit(&self, event: PeerEvent) {
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.events.send(event);
    }

    async fn register_connect_waiter(&self) -> oneshot::Receiver<Result<(), PeerError>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.push_connect_waiter(sender);
        receiver
    }

    /// Register a pending operation, gated on the connection being ready.
    async fn register_operation(
        &self,
        key: OpKey,
        relay: Option<Vec<u8>>,
    ) -> Result<oneshot::Receiver<pending::OpResult>, PeerError> {
        let state = self.state.lock().await;
        if !state.is_ready() {
            return Err(PeerError::NotConnected);
        }
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(
                key,
                PendingOperation {
                    responder: OpResponder::Exclusive(sender),
                    relay,
                },
            )
            .map_err(|_| PeerError::RequestPending)?;
        Ok(receiver)
    }

    /// Register a broadcast batch sharing one completion across entries.
    async fn register_broadcast(
        &self,
        batch: Vec<(Hash256, Vec<u8>)>,
    ) -> Result<oneshot::Receiver<pending::OpResult>, PeerError> {
        let state = self.state.lock().await;
        if !state.is_ready() {
            return Err(PeerError::NotConnected);
        }
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::new(Mutex::new(Some(sender)));
        let mut pending = self.pending.lock().await;
        for (hash, raw) in batch {
            pending.replace(
                OpKey::TransactionRequest(hash),
                PendingOperation {
                    responder: OpResponder::Shared(Arc::clone(&shared)),
                    relay: Some(raw),
                },
            );
        }
        Ok(receiver)
    }

    async fn resolve_operation(&self, key: OpKey, outcome: OpOutcome) {
        let operation = self.pending.lock().await.remove(&key);
        if let Some(operation) = operation {
            operation.responder.resolve(Ok(outcome)).await;
        }
    }

    async fn reject_operation(&self, key: OpKey, err: PeerError) {
        let operation = self.pending.lock().await.remove(&key);
        if let Some(operation) = operation {
            operation.responder.resolve(Err(err)).await;
        }
    }

    async fn remove_operation(&self, key: OpKey) {
        let _ = self.pending.lock().await.remove(&key);
    }

    /// Serialize and write a message to the socket.
    ///
    /// `force` bypasses the readiness check for handshake traffic
    /// (version, verack) and automatic protocol replies.
    async fn send_message(
        &self,
        command: Command,
        payload: &[u8],
        force: bool,
    ) -> Result<(), PeerError> {
        if !force && !self.state.lock().await.is_ready() {
            return Err(PeerError::NotConnected);
        }
        let extended = self.extended_messages.load(Ordering::SeqCst);
        let bytes = envelope::write(&command, payload, self.magic, extended);
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(PeerError::NotConnected)?;
        writer.write_all(&bytes).await?;
        debug!(
            "Sent {command} message ({} bytes) to {}",
            payload.len(),
            self.address
        );
        Ok(())
    }

    /// Drive one connection attempt (dial, handshake, readiness), all
    /// under the connect timeout.
    async fn run_connect(self: Arc<Self>) {
        debug!("Connecting to {}", self.address);
        let ready = self.register_connect_waiter().await;
        let attempt = tokio::time::timeout(self.configuration.connect_timeout, async {
            Arc::clone(&self).establish().await?;
            match ready.await {
                Ok(result) => result,
                Err(_) => Err(PeerError::Disconnected),
            }
        })
        .await;

        match attempt {
            Ok(Ok(())) => info!("Connected to {}", self.address),
            Ok(Err(err)) => {
                debug!("Connection to {} failed: {err}", self.address);
                self.teardown(DisconnectReason::Socket).await;
            }
            Err(_) => {
                debug!("Connection to {} timed out", self.address);
                self.teardown(DisconnectReason::Timeout).await;
            }
        }
    }

    /// Dial the socket, start the read loop, send the local version.
    async fn establish(self: Arc<Self>) -> Result<(), PeerError> {
        let stream = TcpStream::connect(&self.address).await?;
        // No delay is helpful for the small messages of the p2p protocol.
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.state.lock().await = LifecycleState::Handshaking;

        let generation = self.generation.load(Ordering::SeqCst);
        let reader_inner = Arc::clone(&self);
        tokio::spawn(async move { reader_inner.read_loop(read_half, generation).await });

        let version = Version {
            version: self.protocol_version(),
            services: DEFAULT_SERVICES,
            timestamp: handshake::unix_timestamp(),
            receiver: NetworkAddress::unspecified(),
            sender: NetworkAddress::unspecified(),
            nonce: handshake::generate_nonce().to_le_bytes(),
            user_agent: self.user_agent(),
            start_height: self.configuration.start_height,
            relay: self.configuration.relay,
        };
        self.send_message(Command::Version, &version.to_payload(), true)
            .await?;
        debug!("Sent version message to {}", self.address);
        self.emit(PeerEvent::Connected);
        Ok(())
    }

    /// The connection's read loop: socket bytes in, dispatched messages
    /// out, strictly in arrival order.
    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, generation: u64) {
        let mut reassembler = Reassembler::new(
            self.magic,
            self.configuration.stream_blocks,
            self.configuration.verify_checksums,
        );
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let read = tokio::select! {
                _ = self.shutdown.notified() => return,
                read = reader.read(&mut buffer) => read,
            };
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match read {
                Ok(0) => {
                    debug!("Peer closed connection: {}", self.address);
                    Arc::clone(&self).teardown(DisconnectReason::PeerClosed).await;
                    return;
                }
                Ok(count) => {
                    if let Err(err) = self.process(&mut reassembler, &buffer[..count]).await {
                        if self.generation.load(Ordering::SeqCst) != generation {
                            return;
                        }
                        error!("Protocol failure from {}: {err}", self.address);
                        self.emit(PeerEvent::ProtocolError {
                            message: err.to_string(),
                        });
                        Arc::clone(&self).teardown(DisconnectReason::Protocol).await;
                        return;
                    }
                }
                Err(err) => {
                    debug!("Socket error on {}: {err}", self.address);
                    self.emit(PeerEvent::SocketError {
                        message: err.to_string(),
                    });
                    Arc::clone(&self).teardown(DisconnectReason::Socket).await;
                    return;
                }
            }
        }
    }

    /// Feed one socket read through reassembly and dispatch every message
    /// it completes.
    async fn process(&self, reassembler: &mut Reassembler, data: &[u8]) -> Result<(), PeerError> {
        if let Some(progress) = reassembler.feed(data)? {
            self.handle_block_progress(progress).await?;
        }
        // The extended-message flag is sampled per envelope: a version
        // message in this batch changes how the next envelope is parsed.
        loop {
            let extended = self.extended_messages.load(Ordering::SeqCst);
            match reassembler.next(extended)? {
                None => return Ok(()),
                Some(Inbound::Message(frame)) => self.handle_message(frame).await?,
                Some(Inbound::Block(progress)) => self.handle_block_progress(progress).await?,
            }
        }
    }

    /// Dispatch one complete message.
    async fn handle_message(&self, frame: Frame) -> Result<(), PeerError> {
        let Frame {
            command, payload, ..
        } = frame;
        match &command {
            Command::Ping => {
                self.send_message(Command::Pong, &payload, true).await?;
                self.emit(PeerEvent::Ping);
            }
            Command::Pong => {
                if payload.len() == 8 {
                    let mut nonce = [0u8; 8];
                    nonce.copy_from_slice(&payload);
                    self.resolve_operation(OpKey::Pong(nonce), OpOutcome::Pong)
                        .await;
                }
                self.emit(PeerEvent::Pong);
            }
            Command::Version => {
                // Reply immediately, without waiting for our own verack.
                self.send_message(Command::Verack, &[], true).await?;
                let version = Version::read(&payload)?;
                if !self.configuration.disable_extended_messages {
                    let enabled = version.version >= EXTENDED_MESSAGES_MIN_PROTOCOL_VERSION;
                    self.extended_messages.store(enabled, Ordering::SeqCst);
                    if enabled {
                        debug!(
                            "Extended messages enabled (peer version {})",
                            version.version
                        );
                    }
                }
                debug!(
                    "Received version from {}: {} {}",
                    self.address, version.version, version.user_agent
                );
                self.emit(PeerEvent::Version(version));
            }
            Command::Verack => {
                {
                    let mut state = self.state.lock().await;
                    *state = LifecycleState::Ready;
                }
                debug!("Handshake complete with {}", self.address);
                let waiters = self.pending.lock().await.take_connect_waiters();
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                self.emit(PeerEvent::Ready);
            }
            Command::Headers => {
                let headers = headers::read_headers(&payload)?;
                debug!("Received {} headers from {}", headers.len(), self.address);
                self.resolve_operation(OpKey::Headers, OpOutcome::Headers(headers.clone()))
                    .await;
                self.emit(PeerEvent::Headers(headers));
            }
            Command::Inv => {
                let inventory = Inventory::read(&payload)?;
                self.emit(PeerEvent::Inventory(inventory.clone()));
                if !inventory.blocks.is_empty() {
                    self.emit(PeerEvent::BlockHashes(inventory.blocks.clone()));
                }
                if self.events.receiver_count() > 0 {
                    if self.listen_transactions.load(Ordering::SeqCst)
                        && !inventory.transactions.is_empty()
                    {
                        let request = inv::write(&inventory.transactions, inv::INV_TRANSACTION);
                        self.send_message(Command::GetData, &request, false).await?;
                    }
                    if self.listen_blocks.load(Ordering::SeqCst) && !inventory.blocks.is_empty() {
                        let request = inv::write(&inventory.blocks, inv::INV_BLOCK);
                        self.send_message(Command::GetData, &request, false).await?;
                    }
                }
            }
            Command::Block => {
                // Only reachable with streaming disabled; streamed blocks
                // never surface as whole frames.
                let block = Block::from_bytes(&payload)?;
                let hash = block.header.hash();
                debug!("Received block {hash}");
                let transactions: Vec<(u64, Transaction)> = block
                    .transactions
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(index, tx)| (index as u64, tx))
                    .collect();
                self.emit(PeerEvent::Transactions(TransactionBatch {
                    block: Some(hash),
                    transactions,
                    finished: true,
                }));
                let summary = BlockSummary {
                    hash,
                    header: block.header.clone(),
                    transaction_count: block.transactions.len() as u64,
                    size: payload.len() as u64,
                    transactions: block.transactions,
                };
                self.emit(PeerEvent::Block(summary.clone()));
                self.resolve_operation(OpKey::Block(hash), OpOutcome::Block(summary))
                    .await;
            }
            Command::Tx => {
                let transaction = Transaction::from_bytes(&payload)?;
                debug!("Received transaction {}", transaction.hash());
                self.emit(PeerEvent::Transactions(TransactionBatch {
                    block: None,
                    transactions: vec![(0, transaction)],
                    finished: true,
                }));
            }
            Command::NotFound => {
                let inventory = Inventory::read(&payload)?;
                debug!("Peer {} reported notfound", self.address);
                self.emit(PeerEvent::NotFound(inventory.clone()));
                for hash in &inventory.blocks {
                    self.reject_operation(OpKey::Block(*hash), PeerError::NotFound)
                        .await;
                }
            }
            Command::GetData => {
                let inventory = Inventory::read(&payload)?;
                self.emit(PeerEvent::GetData(inventory.clone()));
                for hash in &inventory.transactions {
                    let operation = self
                        .pending
                        .lock()
                        .await
                        .remove(&OpKey::TransactionRequest(*hash));
                    if let Some(operation) = operation {
                        if let Some(raw) = &operation.relay {
                            self.send_message(Command::Tx, raw, false).await?;
                            debug!("Relayed transaction {hash} on peer request");
                        }
                        operation
                            .responder
                            .resolve(Ok(OpOutcome::TransactionSent))
                            .await;
                    }
                }
            }
            Command::Reject => {
                let reject = Reject::read(&payload)?;
                debug!(
                    "Peer {} rejected {}: {}",
                    self.address, reject.message, reject.reason
                );
                self.emit(PeerEvent::Reject(reject));
            }
            Command::Addr => {
                let addresses = read_addr(&payload)?;
                debug!("Received {} addresses from {}", addresses.len(), self.address);
                self.emit(PeerEvent::Addresses(addresses));
            }
            Command::Alert => {
                self.emit(PeerEvent::Alert {
                    payload: payload.clone(),
                });
            }
            Command::GetHeaders => {
                self.emit(PeerEvent::GetHeaders);
            }
            Command::SendHeaders => {
                self.emit(PeerEvent::SendHeaders);
            }
            Command::SendCmpct => {
                self.emit(PeerEvent::SendCompact {
                    payload: payload.clone(),
                });
            }
            Command::Unknown(name) => {
                debug!(
                    "Unknown command {name} from {} ({} bytes)",
                    self.address,
                    payload.len()
                );
                self.emit(PeerEvent::Unknown {
                    command: name.clone(),
                    payload: payload.clone(),
                });
            }
            // Commands we only ever send; tolerated silently inbound.
            Command::GetAddr | Command::Mempool => {}
        }
        self.emit(PeerEvent::Message { command, payload });
        Ok(())
    }

    /// Surface streaming progress for a block chunk and resolve the fetch
    /// when it completes.
    async fn handle_block_progress(&self, progress: BlockProgress) -> Result<(), PeerError> {
        let header = match progress.header.clone() {
            Some(header) => header,
            None => return Ok(()),
        };
        let hash = header.hash();
        self.emit(PeerEvent::Transactions(TransactionBatch {
            block: Some(hash),
            transactions: progress.transactions.clone(),
            finished: progress.finished,
        }));
        self.emit(PeerEvent::BlockChunk(BlockChunkInfo {
            hash,
            sequence: progress.chunk,
            started: progress.started,
            finished: progress.finished,
            transactions_decoded: progress.transactions_decoded,
            bytes_remaining: progress.bytes_remaining,
            size: progress.size,
        }));
        if progress.finished {
            debug!(
                "Finished streaming block {hash} ({} transactions, {} bytes)",
                progress.transactions_decoded, progress.size
            );
            let summary = BlockSummary {
                hash,
                header,
                transaction_count: progress
                    .transaction_count
                    .unwrap_or(progress.transactions_decoded),
                size: progress.size,
                transactions: Vec::new(),
            };
            self.resolve_operation(OpKey::Block(hash), OpOutcome::Block(summary))
                .await;
        }
        Ok(())
    }

    /// Tear the connection down and reject everything outstanding.
    ///
    /// Idempotent: only the first caller after a given session acts. When
    /// automatic reconnection applies, schedules a best-effort retry whose
    /// failure is swallowed.
    async fn teardown(self: Arc<Self>, reason: DisconnectReason) {
        {
            let mut state = self.state.lock().await;
            if *state == LifecycleState::Disconnected {
                return;
            }
            *state = LifecycleState::Disconnected;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        *self.writer.lock().await = None;
        self.extended_messages.store(false, Ordering::SeqCst);

        let (waiters, operations) = self.pending.lock().await.drain();
        for waiter in waiters {
            let err = match reason {
                DisconnectReason::Timeout => PeerError::Timeout,
                _ => PeerError::Disconnected,
            };
            let _ = waiter.send(Err(err));
        }
        for (_, operation) in operations {
            operation
                .responder
                .resolve(Err(PeerError::Disconnected))
                .await;
        }

        let disconnects = self.disconnects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Disconnected from {} ({reason:?}, total {disconnects})",
            self.address
        );
        self.emit(PeerEvent::Disconnected { disconnects });

        if reason != DisconnectReason::Requested && self.auto_reconnect.load(Ordering::SeqCst) {
            let inner = Arc::clone(&self);
            let task = tokio::spawn(async move {
                tokio::time::sleep(RECONNECT_DELAY).await;
                inner.reconnect_attempt().await;
            });
            *self.reconnect_task.lock().await = Some(task);
        }
    }

    /// Best-effort reconnect; a concurrent manual connect wins.
    ///
    /// Returns a boxed future with a concrete (non-opaque) type so the
    /// self-referential connect/teardown/reconnect chain does not form an
    /// unresolvable opaque-type cycle when its `Send`-ness is checked.
    fn reconnect_attempt(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock().await;
                if *state != LifecycleState::Disconnected {
                    return;
                }
                *state = LifecycleState::Connecting;
            }
            debug!("Reconnecting to {}", self.address);
            self.run_connect().await;
        })
    }
}
