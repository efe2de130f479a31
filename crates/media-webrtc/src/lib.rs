//! `webrtc`-backed implementation of the [`media_engine`] contract.
//!
//! One [`WebRtcEngine`] is built at startup and shared for the lifetime of
//! the process; every peer connection it creates shares the same codec and
//! interceptor registry.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use media_engine::{
    CodecParameters, Connection, ConnectionEvent, EngineError, IceServer, InboundTrack,
    MediaEngine, OutboundTrack, SessionDescription, StateCallback, TrackCallback, TrackError,
    TransceiverDirection,
};

pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, EngineError> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|err| EngineError::Setup(err.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut codecs)
            .map_err(|err| EngineError::Setup(err.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

fn to_rtc_ice_servers(ice_servers: &[IceServer]) -> Vec<RTCIceServer> {
    ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.kind.as_str() {
        "offer" => RTCSessionDescription::offer(desc.sdp),
        "answer" => RTCSessionDescription::answer(desc.sdp),
        other => {
            return Err(EngineError::Negotiation(format!(
                "unsupported description type {other:?}"
            )))
        }
    };
    result.map_err(|err| EngineError::Negotiation(err.to_string()))
}

fn from_rtc_description(desc: RTCSessionDescription) -> SessionDescription {
    SessionDescription {
        kind: desc.sdp_type.to_string(),
        sdp: desc.sdp,
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionEvent> {
    match state {
        RTCPeerConnectionState::Connected => Some(ConnectionEvent::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionEvent::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionEvent::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionEvent::Closed),
        _ => None,
    }
}

fn classify_track_error(err: webrtc::Error) -> TrackError {
    if err == webrtc::Error::ErrClosedPipe {
        TrackError::ClosedPipe
    } else {
        TrackError::Io(err.to_string())
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn new_connection(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Arc<dyn Connection>, EngineError> {
        let config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(ice_servers),
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|err| EngineError::Setup(err.to_string()))?;

        Ok(Arc::new(WebRtcConnection { pc: Arc::new(pc) }))
    }

    fn new_forwarding_track(
        &self,
        codec: CodecParameters,
        id: String,
        stream_id: String,
    ) -> Result<Arc<dyn OutboundTrack>, EngineError> {
        let capability = RTCRtpCodecCapability {
            mime_type: codec.mime_type,
            clock_rate: codec.clock_rate,
            sdp_fmtp_line: codec.sdp_fmtp_line,
            ..Default::default()
        };
        Ok(Arc::new(ForwardingTrack {
            inner: Arc::new(TrackLocalStaticRTP::new(capability, id, stream_id)),
        }))
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl Connection for WebRtcConnection {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|err| EngineError::Negotiation(err.to_string()))
    }

    async fn add_video_transceiver(
        &self,
        direction: TransceiverDirection,
    ) -> Result<(), EngineError> {
        let direction = match direction {
            TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
            TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
        };
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction,
                    send_encodings: vec![],
                }),
            )
            .await
            .map(|_| ())
            .map_err(|err| EngineError::Negotiation(err.to_string()))
    }

    async fn attach_track(&self, track: Arc<dyn OutboundTrack>) -> Result<(), EngineError> {
        let track = track
            .as_any()
            .downcast::<ForwardingTrack>()
            .map_err(|_| EngineError::Setup("track was not created by this engine".to_string()))?;
        self.pc
            .add_track(Arc::clone(&track.inner) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map(|_| ())
            .map_err(|err| EngineError::Negotiation(err.to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.pc
            .create_answer(None)
            .await
            .map(from_rtc_description)
            .map_err(|err| EngineError::Negotiation(err.to_string()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|err| EngineError::Negotiation(err.to_string()))
    }

    async fn wait_gathering_complete(&self, timeout: Duration) -> Result<(), EngineError> {
        let mut done = self.pc.gathering_complete_promise().await;
        tokio::time::timeout(timeout, done.recv())
            .await
            .map(|_| ())
            .map_err(|_| EngineError::GatheringTimeout(timeout))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc_description)
    }

    fn on_inbound_track(&self, callback: TrackCallback) {
        let callback: Arc<dyn Fn(Arc<dyn InboundTrack>) + Send + Sync> = Arc::from(callback);
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let callback = Arc::clone(&callback);
            Box::pin(async move {
                callback(Arc::new(RemoteTrack { inner: track }) as Arc<dyn InboundTrack>);
            })
        }));
    }

    fn on_state_change(&self, callback: StateCallback) {
        let callback: Arc<dyn Fn(ConnectionEvent) + Send + Sync> = Arc::from(callback);
        self.pc
            .on_peer_connection_state_change(Box::new(move |state| {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    if let Some(event) = map_connection_state(state) {
                        callback(event);
                    }
                })
            }));
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            debug!(error = %err, "peer connection close failed");
        }
    }
}

struct RemoteTrack {
    inner: Arc<TrackRemote>,
}

#[async_trait]
impl InboundTrack for RemoteTrack {
    fn codec(&self) -> CodecParameters {
        let capability = self.inner.codec().capability;
        CodecParameters {
            mime_type: capability.mime_type,
            clock_rate: capability.clock_rate,
            sdp_fmtp_line: capability.sdp_fmtp_line,
        }
    }

    fn id(&self) -> String {
        self.inner.id()
    }

    fn stream_id(&self) -> String {
        self.inner.stream_id()
    }

    async fn read_packet(&self) -> Result<Bytes, TrackError> {
        let (packet, _attributes) = self
            .inner
            .read_rtp()
            .await
            .map_err(classify_track_error)?;
        packet
            .marshal()
            .map_err(|err| TrackError::Io(err.to_string()))
    }
}

struct ForwardingTrack {
    inner: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl OutboundTrack for ForwardingTrack {
    async fn write_packet(&self, packet: &Bytes) -> Result<(), TrackError> {
        self.inner
            .write(packet)
            .await
            .map(|_| ())
            .map_err(classify_track_error)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
