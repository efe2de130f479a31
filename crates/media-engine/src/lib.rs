//! Contract between the pairing core and whatever drives the actual media
//! transport. The core only ever sees these traits; the production
//! implementation lives in `media-webrtc`.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SDP payload exchanged during an offer/answer cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    /// "offer" or "answer".
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// One ICE server entry handed to the engine when a connection is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Direction of the single video transceiver a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendOnly,
    RecvOnly,
}

/// Codec parameters mirrored from an inbound track onto its forwarding
/// counterpart. No transcoding happens anywhere, so these pass through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    pub mime_type: String,
    pub clock_rate: u32,
    pub sdp_fmtp_line: String,
}

/// Connection-state transitions surfaced to the state-change callback.
/// Intermediate negotiation states are not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionEvent {
    /// Whether this event means the connection is gone for good.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConnectionEvent::Connected)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("signaling failed: {0}")]
    Negotiation(String),
    #[error("ice gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),
}

/// Read/write failures on a media track.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Nothing is bound to the far side of the track. Writers treat this as
    /// transient: a reader may attach later.
    #[error("track has no bound reader")]
    ClosedPipe,
    #[error("track io failed: {0}")]
    Io(String),
}

impl TrackError {
    pub fn is_closed_pipe(&self) -> bool {
        matches!(self, TrackError::ClosedPipe)
    }
}

pub type TrackCallback = Box<dyn Fn(Arc<dyn InboundTrack>) + Send + Sync>;
pub type StateCallback = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Factory for peer connections and forwarding tracks.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn new_connection(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Arc<dyn Connection>, EngineError>;

    /// Build an outbound track that mirrors a remote track's negotiated
    /// codec. The track can be written to immediately; packets written
    /// before any connection attaches it are dropped as closed-pipe writes.
    fn new_forwarding_track(
        &self,
        codec: CodecParameters,
        id: String,
        stream_id: String,
    ) -> Result<Arc<dyn OutboundTrack>, EngineError>;
}

/// One peer connection. Callbacks fire on the engine's own tasks and must be
/// synchronized by the caller like any other concurrent access.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_video_transceiver(
        &self,
        direction: TransceiverDirection,
    ) -> Result<(), EngineError>;

    /// Attach a forwarding track previously produced by
    /// [`MediaEngine::new_forwarding_track`] of the same engine.
    async fn attach_track(&self, track: Arc<dyn OutboundTrack>) -> Result<(), EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Resolves once ICE candidate gathering finishes, or fails with
    /// [`EngineError::GatheringTimeout`] after `timeout`.
    async fn wait_gathering_complete(&self, timeout: Duration) -> Result<(), EngineError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    fn on_inbound_track(&self, callback: TrackCallback);

    fn on_state_change(&self, callback: StateCallback);

    async fn close(&self);
}

#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn codec(&self) -> CodecParameters;
    fn id(&self) -> String;
    fn stream_id(&self) -> String;

    /// Blocks until the next packet arrives or the track dies. There is no
    /// partial read; a packet is one marshalled RTP datagram.
    async fn read_packet(&self) -> Result<Bytes, TrackError>;
}

#[async_trait]
pub trait OutboundTrack: Send + Sync {
    async fn write_packet(&self, packet: &Bytes) -> Result<(), TrackError>;

    /// Escape hatch for engine implementations to recover their own concrete
    /// track type inside [`Connection::attach_track`].
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
