//! sfu-client
//!
//! Client-side orchestrator for an SFU-based conferencing room. The session
//! joins a room over a signaling channel, negotiates device capabilities and
//! a pair of webrtc transports, publishes local tracks as producers, and
//! mirrors every remote participant's published tracks into an observable
//! peer directory.
//!
//! Media capture and rendering are the caller's responsibility; this crate
//! only moves track handles and signaling state. The signaling contract is
//! described by the request types in this crate and exercised end to end by
//! the in-process server in [`testing`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

mod error;
mod internal;
mod media;

#[cfg(feature = "test-server")]
pub mod testing;

// public exports
pub use error::{SessionError, SignalingError};
pub use internal::data_types::{
    ConsumerId, PeerId, PeerInfo, ProducerId, RtpCapabilities, RtpCodecCapability, TransportId,
};
pub use internal::events::ServerEvent;
pub use internal::peers::{MediaStream, RemotePeer};
pub use media::{LocalTrack, LocalTrackHandle, MediaKind, MimeType, RemoteTrack};

use internal::data_types::JoinRoom;
use internal::device::Device;
use internal::peers;
use internal::publish::{Producer, Publications};
use internal::signaling::{NotificationReceiver, SignalingChannel, SignalingRequest};
use internal::subscribe::{self, Subscriptions};
use internal::transport::{Transport, TransportDirection};

/// session lifecycle, as exposed through [`RoomState`]
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    #[display(fmt = "idle")]
    Idle,
    #[display(fmt = "connecting")]
    Connecting,
    #[display(fmt = "connected")]
    Connected,
    #[display(fmt = "error")]
    Error,
}

/// the reactive projection the UI layer consumes. every update is a full
/// snapshot; peers are never mutated in place
#[derive(Clone, Debug)]
pub struct RoomState {
    pub status: SessionStatus,
    pub error: Option<String>,
    pub peers: HashMap<PeerId, RemotePeer>,
}

impl RoomState {
    fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            error: None,
            peers: HashMap::new(),
        }
    }
}

/// static tuning for one session. the codec/bitrate policy is deliberately
/// plain configuration, not something the session adapts at runtime
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub server_url: String,
    pub room_id: String,
    pub display_name: String,
    /// bound on the signaling websocket handshake
    pub connect_timeout: Duration,
    /// bound on every signaling round trip
    pub call_timeout: Duration,
    /// single-layer cap applied to video producers
    pub video_max_bitrate: u32,
    /// extra resume-consumer attempts after a failed one
    pub resume_retries: u32,
}

impl SessionConfig {
    pub fn new(
        server_url: impl Into<String>,
        room_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            room_id: room_id.into(),
            display_name: display_name.into(),
            connect_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(10),
            video_max_bitrate: 900_000,
            resume_retries: 1,
        }
    }
}

/// open resource counts, mostly useful to verify cleanup
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub producers: usize,
    pub consumers: usize,
    pub transports: usize,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) channel: Option<SignalingChannel>,
    pub(crate) device: Option<Arc<Device>>,
    pub(crate) send_transport: Option<Arc<Transport>>,
    pub(crate) recv_transport: Option<Arc<Transport>>,
    pub(crate) publications: Publications,
    pub(crate) subscriptions: Subscriptions,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) state: watch::Sender<RoomState>,
    state_rx: watch::Receiver<RoomState>,
    /// cleared by the first teardown; handlers resolving afterwards no-op
    pub(crate) live: AtomicBool,
    joined: AtomicBool,
    pub(crate) inner: Mutex<Inner>,
    local_peer_id: std::sync::Mutex<Option<PeerId>>,
}

/// one conferencing session: a (room id, display name) pair
///
/// The following functions are driven by the UI:
/// join
/// publish
/// leave
///
/// Everything else is driven by server pushes on the signaling channel.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(RoomState::idle());
        Self {
            shared: Arc::new(Shared {
                config,
                state: state_tx,
                state_rx,
                live: AtomicBool::new(true),
                joined: AtomicBool::new(false),
                inner: Mutex::new(Inner::default()),
                local_peer_id: std::sync::Mutex::new(None),
            }),
        }
    }

    /// observe the `{status, error, peers}` projection
    pub fn watch(&self) -> watch::Receiver<RoomState> {
        self.shared.state_rx.clone()
    }

    /// the identity the server assigned on join
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.shared
            .local_peer_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.shared.inner.lock().await;
        SessionStats {
            producers: inner.publications.len(),
            consumers: inner.subscriptions.len(),
            transports: usize::from(inner.send_transport.is_some())
                + usize::from(inner.recv_transport.is_some()),
        }
    }

    /// connect the channel, join the room, negotiate the device and both
    /// transports, then process the room snapshot. any failure along the way
    /// flips the session to `error` and releases whatever was built
    pub async fn join(&self) -> Result<(), SessionError> {
        if self.shared.joined.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyJoined);
        }
        {
            // state commits are serialized with teardown through the registry
            // lock; a session that was already left stays idle
            let _inner = self.shared.inner.lock().await;
            if !self.shared.live.load(Ordering::SeqCst) {
                return Err(SignalingError::ChannelClosed.into());
            }
            self.shared.state.send_modify(|state| {
                state.status = SessionStatus::Connecting;
                state.error = None;
            });
        }
        match self.connect_flow().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.fail(&e).await;
                Err(e)
            }
        }
    }

    async fn connect_flow(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        let config = &shared.config;

        let (channel, mut notifications) =
            SignalingChannel::connect(&config.server_url, config.connect_timeout).await?;
        {
            let mut inner = shared.inner.lock().await;
            if !shared.live.load(Ordering::SeqCst) {
                channel.close();
                return Err(SignalingError::ChannelClosed.into());
            }
            inner.channel = Some(channel.clone());
        }

        // join round trip: the response arrives as a pushed joined-room
        // event. anything else arriving first is buffered and replayed only
        // after the snapshot commits, so a racing new-peer cannot duplicate
        // a snapshot peer
        channel.emit(&JoinRoom {
            room_id: config.room_id.clone(),
            display_name: config.display_name.clone(),
        })?;
        let mut buffered = Vec::new();
        let (local_peer_id, snapshot) = loop {
            let event = tokio::time::timeout(config.call_timeout, notifications.recv())
                .await
                .map_err(|_| SignalingError::CallTimeout {
                    event: JoinRoom::EVENT,
                })?
                .ok_or(SignalingError::ChannelClosed)?;
            match event {
                ServerEvent::JoinedRoom { peer_id, peers } => break (peer_id, peers),
                other => buffered.push(other),
            }
        };
        log::info!("joined room {} as {local_peer_id}", config.room_id);
        *shared
            .local_peer_id
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(local_peer_id);

        let device = Arc::new(Device::load(&channel, config.call_timeout).await?);
        {
            let mut inner = shared.inner.lock().await;
            inner.device = Some(device.clone());
        }

        // the two transports share no mutable state; create them concurrently
        let (send_transport, recv_transport) = futures::future::try_join(
            Transport::create(&channel, &device, TransportDirection::Send, config.call_timeout),
            Transport::create(&channel, &device, TransportDirection::Recv, config.call_timeout),
        )
        .await?;
        {
            let mut inner = shared.inner.lock().await;
            if !shared.live.load(Ordering::SeqCst) {
                return Err(SignalingError::ChannelClosed.into());
            }
            inner.send_transport = Some(Arc::new(send_transport));
            inner.recv_transport = Some(Arc::new(recv_transport));

            // the snapshot commits atomically with the flip to connected, so
            // observers never see partial peer state while connecting
            shared.state.send_modify(|state| {
                for peer in &snapshot {
                    peers::ensure_peer(&mut state.peers, &peer.id, Some(&peer.display_name));
                }
                state.status = SessionStatus::Connected;
                state.error = None;
            });
        }

        // eagerly consume the snapshot's already-known producers
        for peer in snapshot {
            for producer_id in peer.producer_ids {
                spawn_consume(shared, producer_id, peer.id.clone()).await;
            }
        }

        // replay pushes that raced ahead of the join response
        for event in buffered {
            handle_event(shared, event).await;
        }

        let pump = tokio::spawn(event_pump(shared.clone(), notifications));
        shared.inner.lock().await.tasks.push(pump);
        Ok(())
    }

    /// publish local tracks on the send transport. idempotent: tracks that
    /// are already published are skipped, and a failed track does not block
    /// the remaining ones
    pub async fn publish(&self, tracks: &[LocalTrack]) -> Result<(), SessionError> {
        let shared = &self.shared;
        if shared.state_rx.borrow().status != SessionStatus::Connected {
            return Err(SessionError::NotConnected);
        }
        let (transport, device) = {
            let inner = shared.inner.lock().await;
            match (inner.send_transport.clone(), inner.device.clone()) {
                (Some(transport), Some(device)) => (transport, device),
                _ => return Err(SessionError::NotConnected),
            }
        };
        for track in tracks {
            {
                let mut inner = shared.inner.lock().await;
                if !shared.live.load(Ordering::SeqCst) {
                    return Err(SessionError::NotConnected);
                }
                if !inner.publications.claim(track) {
                    log::debug!("track {} already published", track.id());
                    continue;
                }
            }
            let parameters =
                device.producer_parameters(track.kind(), shared.config.video_max_bitrate);
            match transport.produce(track.kind(), parameters).await {
                Ok(id) => {
                    let mut inner = shared.inner.lock().await;
                    if !shared.live.load(Ordering::SeqCst) {
                        return Err(SessionError::NotConnected);
                    }
                    log::info!("published {} track {} as producer {id}", track.kind(), track.id());
                    inner.publications.register(Producer {
                        id,
                        kind: track.kind(),
                        track_id: track.id().to_owned(),
                    });
                    let watcher = tokio::spawn(watch_track_end(shared.clone(), track.clone()));
                    inner.tasks.retain(|task| !task.is_finished());
                    inner.tasks.push(watcher);
                }
                Err(e) => {
                    // a failed producer must not block the remaining tracks
                    log::warn!("failed to publish {} track {}: {e}", track.kind(), track.id());
                    let mut inner = shared.inner.lock().await;
                    inner.publications.release(track.id());
                }
            }
        }
        Ok(())
    }

    /// release every producer, consumer, transport, the device and the
    /// signaling channel, and return to `idle`. safe to call any number of
    /// times, from any state
    pub async fn leave(&self) {
        let shared = &self.shared;
        if shared.live.swap(false, Ordering::SeqCst) {
            log::info!("leaving room {}", shared.config.room_id);
            let mut inner = shared.inner.lock().await;
            release_resources(&mut inner);
        }
        shared.state.send_modify(|state| {
            state.status = SessionStatus::Idle;
            state.error = None;
            state.peers.clear();
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.shared.live.swap(false, Ordering::SeqCst) {
            return;
        }
        // best-effort teardown without awaiting; uncontended at drop time
        // unless a handler is mid-commit, and those guard on `live`
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            release_resources(&mut inner);
        }
    }
}

impl Shared {
    /// fatal-error teardown. loses the race against an explicit leave on
    /// purpose: the first teardown decides the final state
    pub(crate) async fn fail(&self, error: &SessionError) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        log::error!("session failed: {error}");
        {
            let mut inner = self.inner.lock().await;
            release_resources(&mut inner);
        }
        let message = error.to_string();
        self.state.send_modify(|state| {
            state.status = SessionStatus::Error;
            state.error = Some(message);
            state.peers.clear();
        });
    }
}

/// closes consumers, then producers, both transports, the device and the
/// channel, and cancels every outstanding task
fn release_resources(inner: &mut Inner) {
    inner.subscriptions.close_all();
    inner.publications.close_all();
    if let Some(transport) = inner.send_transport.take() {
        transport.close();
    }
    if let Some(transport) = inner.recv_transport.take() {
        transport.close();
    }
    inner.device = None;
    if let Some(channel) = inner.channel.take() {
        channel.close();
    }
    for task in inner.tasks.drain(..) {
        task.abort();
    }
}

async fn event_pump(shared: Arc<Shared>, mut notifications: NotificationReceiver) {
    while let Some(event) = notifications.recv().await {
        if !shared.live.load(Ordering::SeqCst) {
            return;
        }
        handle_event(&shared, event).await;
    }
    // the channel dropped out from under the session
    if shared.live.load(Ordering::SeqCst) {
        shared
            .fail(&SessionError::Signaling(SignalingError::ChannelClosed))
            .await;
    }
}

async fn handle_event(shared: &Arc<Shared>, event: ServerEvent) {
    match event {
        ServerEvent::JoinedRoom { .. } => {
            log::debug!("ignoring duplicate joined-room notification");
        }
        ServerEvent::NewPeer { peer } => {
            {
                let _inner = shared.inner.lock().await;
                if !shared.live.load(Ordering::SeqCst) {
                    return;
                }
                shared.state.send_modify(|state| {
                    if !peers::ensure_peer(&mut state.peers, &peer.id, Some(&peer.display_name)) {
                        log::debug!("peer {} already known", peer.id);
                    }
                });
            }
            // a late snapshot-style announcement may carry producer ids
            for producer_id in peer.producer_ids {
                spawn_consume(shared, producer_id, peer.id.clone()).await;
            }
        }
        ServerEvent::NewProducer { producer_id, peer_id } => {
            {
                // the owning peer entry must exist before its consumer
                // attaches; synthesize it when the announcement wins the race
                let _inner = shared.inner.lock().await;
                if !shared.live.load(Ordering::SeqCst) {
                    return;
                }
                shared.state.send_modify(|state| {
                    peers::ensure_peer(&mut state.peers, &peer_id, None);
                });
            }
            spawn_consume(shared, producer_id, peer_id).await;
        }
        ServerEvent::PeerLeft { peer_id } => {
            let mut inner = shared.inner.lock().await;
            if !shared.live.load(Ordering::SeqCst) {
                return;
            }
            let removed = inner.subscriptions.remove_for_peer(&peer_id);
            for consumer in removed {
                consumer.close();
            }
            shared.state.send_modify(|state| {
                if state.peers.remove(&peer_id).is_none() {
                    log::debug!("peer-left for unknown peer {peer_id}");
                }
            });
            log::info!("peer {peer_id} left");
        }
    }
}

async fn spawn_consume(shared: &Arc<Shared>, producer_id: ProducerId, peer_id: PeerId) {
    let mut inner = shared.inner.lock().await;
    if !shared.live.load(Ordering::SeqCst) {
        return;
    }
    if !inner.subscriptions.claim_producer(&producer_id) {
        log::debug!("producer {producer_id} is already being consumed");
        return;
    }
    let task = tokio::spawn(subscribe::consume(shared.clone(), producer_id, peer_id));
    inner.tasks.retain(|t| !t.is_finished());
    inner.tasks.push(task);
}

async fn watch_track_end(shared: Arc<Shared>, track: LocalTrack) {
    track.ended().await;
    let mut inner = shared.inner.lock().await;
    if let Some(producer) = inner.publications.remove_by_track(track.id()) {
        log::info!("local {} track {} ended", track.kind(), track.id());
        producer.close();
    }
}
