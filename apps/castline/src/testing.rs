//! Mock media engine for exercising the pairing core without any real
//! transport: scripted connections, channel-fed inbound tracks and
//! recording outbound tracks.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use media_engine::{
    CodecParameters, Connection, ConnectionEvent, EngineError, IceServer, InboundTrack,
    MediaEngine, OutboundTrack, SessionDescription, StateCallback, TrackCallback, TrackError,
    TransceiverDirection,
};

use crate::config::Config;
use crate::pairing::{PairingRegistry, SharedRegistry};

pub fn test_registry(engine: Arc<MockEngine>) -> SharedRegistry {
    let engine: Arc<dyn MediaEngine> = engine;
    Arc::new(PairingRegistry::new(engine, &Config::default()))
}

/// Poll until `condition` holds, failing the test after two seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within deadline"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Default)]
pub struct MockEngine {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    forwarding_tracks: Mutex<Vec<Arc<MockOutboundTrack>>>,
    fail_next_connection: AtomicBool,
    held: Mutex<Option<HeldConnection>>,
}

struct HeldConnection {
    open: oneshot::Receiver<()>,
    reached: Arc<AtomicBool>,
}

/// Handle from [`MockEngine::hold_next_connection`]: the next connection
/// request parks inside the engine until `open` is called.
pub struct ConnectionGate {
    open: oneshot::Sender<()>,
    reached: Arc<AtomicBool>,
}

impl ConnectionGate {
    /// Whether a connection request is parked at the gate yet.
    pub fn reached(&self) -> bool {
        self.reached.load(Ordering::SeqCst)
    }

    pub fn open(self) {
        let _ = self.open.send(());
    }
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        Arc::clone(&self.connections.lock()[index])
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn forwarding_track(&self, index: usize) -> Arc<MockOutboundTrack> {
        Arc::clone(&self.forwarding_tracks.lock()[index])
    }

    pub fn forwarding_track_count(&self) -> usize {
        self.forwarding_tracks.lock().len()
    }

    pub fn fail_next_connection(&self) {
        self.fail_next_connection.store(true, Ordering::SeqCst);
    }

    pub fn hold_next_connection(&self) -> ConnectionGate {
        let (tx, rx) = oneshot::channel();
        let reached = Arc::new(AtomicBool::new(false));
        *self.held.lock() = Some(HeldConnection {
            open: rx,
            reached: Arc::clone(&reached),
        });
        ConnectionGate { open: tx, reached }
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn new_connection(
        &self,
        _ice_servers: &[IceServer],
    ) -> Result<Arc<dyn Connection>, EngineError> {
        if self.fail_next_connection.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Setup("scripted connection failure".into()));
        }
        let held = self.held.lock().take();
        if let Some(held) = held {
            held.reached.store(true, Ordering::SeqCst);
            let _ = held.open.await;
        }
        let connection = Arc::new(MockConnection::default());
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }

    fn new_forwarding_track(
        &self,
        codec: CodecParameters,
        _id: String,
        _stream_id: String,
    ) -> Result<Arc<dyn OutboundTrack>, EngineError> {
        let track = Arc::new(MockOutboundTrack {
            codec,
            mode: Mutex::new(WriteMode::Accept),
            written: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        });
        self.forwarding_tracks.lock().push(Arc::clone(&track));
        Ok(track)
    }
}

#[derive(Default)]
pub struct MockConnection {
    track_callback: Mutex<Option<TrackCallback>>,
    state_callback: Mutex<Option<StateCallback>>,
    attached: Mutex<Vec<Arc<dyn OutboundTrack>>>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
}

impl MockConnection {
    /// Simulate the engine delivering an inbound track.
    pub fn fire_inbound_track(&self, track: Arc<dyn InboundTrack>) {
        if let Some(callback) = &*self.track_callback.lock() {
            callback(track);
        }
    }

    /// Simulate a connection-state transition.
    pub fn fire_state(&self, event: ConnectionEvent) {
        if let Some(callback) = &*self.state_callback.lock() {
            callback(event);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn add_video_transceiver(
        &self,
        _direction: TransceiverDirection,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    async fn attach_track(&self, track: Arc<dyn OutboundTrack>) -> Result<(), EngineError> {
        self.attached.lock().push(track);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn wait_gathering_complete(&self, _timeout: Duration) -> Result<(), EngineError> {
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    fn on_inbound_track(&self, callback: TrackCallback) {
        *self.track_callback.lock() = Some(callback);
    }

    fn on_state_change(&self, callback: StateCallback) {
        *self.state_callback.lock() = Some(callback);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hand-feeds packets (or failures) to a [`MockInboundTrack`].
pub struct PacketFeed(mpsc::UnboundedSender<Result<Bytes, TrackError>>);

impl PacketFeed {
    /// Feeds into a dropped track are silently discarded, like media sent
    /// after the forwarder exits.
    pub fn push(&self, packet: &[u8]) {
        let _ = self.0.send(Ok(Bytes::copy_from_slice(packet)));
    }

    pub fn fail(&self) {
        let _ = self.0.send(Err(TrackError::Io("scripted read failure".into())));
    }

    /// Whether the track side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

pub fn mock_inbound_track() -> (Arc<MockInboundTrack>, PacketFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let track = Arc::new(MockInboundTrack {
        codec: CodecParameters {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            sdp_fmtp_line: String::new(),
        },
        packets: tokio::sync::Mutex::new(rx),
    });
    (track, PacketFeed(tx))
}

pub struct MockInboundTrack {
    codec: CodecParameters,
    packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Bytes, TrackError>>>,
}

#[async_trait]
impl InboundTrack for MockInboundTrack {
    fn codec(&self) -> CodecParameters {
        self.codec.clone()
    }

    fn id(&self) -> String {
        "mock-video".to_string()
    }

    fn stream_id(&self) -> String {
        "mock-stream".to_string()
    }

    async fn read_packet(&self) -> Result<Bytes, TrackError> {
        match self.packets.lock().await.recv().await {
            Some(result) => result,
            None => Err(TrackError::Io("track ended".into())),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Accept,
    ClosedPipe,
    Fail,
}

pub struct MockOutboundTrack {
    codec: CodecParameters,
    mode: Mutex<WriteMode>,
    written: Mutex<Vec<Bytes>>,
    attempts: AtomicUsize,
}

impl MockOutboundTrack {
    pub fn set_mode(&self, mode: WriteMode) {
        *self.mode.lock() = mode;
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    /// Every `write_packet` call, including rejected ones.
    pub fn write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn codec(&self) -> CodecParameters {
        self.codec.clone()
    }
}

#[async_trait]
impl OutboundTrack for MockOutboundTrack {
    async fn write_packet(&self, packet: &Bytes) -> Result<(), TrackError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock() {
            WriteMode::Accept => {
                self.written.lock().push(packet.clone());
                Ok(())
            }
            WriteMode::ClosedPipe => Err(TrackError::ClosedPipe),
            WriteMode::Fail => Err(TrackError::Io("scripted write failure".into())),
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
