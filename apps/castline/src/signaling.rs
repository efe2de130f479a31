//! One offer/answer cycle against the media engine, shared by both legs.
//!
//! The sender leg passes a receive-only transceiver direction; the receiver
//! leg passes the forwarding track to attach instead. Every failure is
//! non-retriable for the request in hand: the caller restarts the whole
//! exchange with a fresh offer.

use std::sync::Arc;
use std::time::Duration;

use media_engine::{
    Connection, EngineError, OutboundTrack, SessionDescription, TransceiverDirection,
};

pub(crate) async fn answer_offer(
    connection: &dyn Connection,
    offer: SessionDescription,
    transceiver: Option<TransceiverDirection>,
    outbound: Option<Arc<dyn OutboundTrack>>,
    gathering_timeout: Duration,
) -> Result<SessionDescription, EngineError> {
    connection.set_remote_description(offer).await?;
    if let Some(direction) = transceiver {
        connection.add_video_transceiver(direction).await?;
    }
    if let Some(track) = outbound {
        connection.attach_track(track).await?;
    }

    let answer = connection.create_answer().await?;
    connection.set_local_description(answer).await?;

    // The answer returned to the caller carries the gathered candidates, so
    // the final local description is read back after gathering finishes.
    connection.wait_gathering_complete(gathering_timeout).await?;
    connection.local_description().await.ok_or_else(|| {
        EngineError::Negotiation("local description missing after gathering".to_string())
    })
}
