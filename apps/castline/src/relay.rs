//! The relay forwarder: one supervised task per sender that copies packets
//! from the inbound track to the receiver-facing forwarding track until a
//! terminal failure or cancellation, then runs teardown.

use std::sync::Arc;

use tracing::{debug, info, warn};

use media_engine::InboundTrack;

use crate::pairing::{SenderSession, SharedRegistry};

/// Entry point for the engine's inbound-track callback.
pub(crate) fn spawn_forwarder(
    registry: SharedRegistry,
    session: Arc<SenderSession>,
    track: Arc<dyn InboundTrack>,
) {
    tokio::spawn(run_forwarder(registry, session, track));
}

async fn run_forwarder(
    registry: SharedRegistry,
    session: Arc<SenderSession>,
    track: Arc<dyn InboundTrack>,
) {
    // First arrival wins; an engine re-firing the callback must not steal
    // the forwarding track.
    if session.state.lock().forwarding.is_some() {
        debug!(name = %session.name, "duplicate inbound track ignored");
        return;
    }

    let outbound = match registry
        .engine()
        .new_forwarding_track(track.codec(), track.id(), track.stream_id())
    {
        Ok(outbound) => outbound,
        Err(err) => {
            warn!(error = %err, "could not create forwarding track");
            registry.teardown(&session).await;
            return;
        }
    };

    {
        let mut state = session.state.lock();
        if state.forwarding.is_some() {
            debug!(name = %session.name, "duplicate inbound track ignored");
            return;
        }
        state.forwarding = Some(Arc::clone(&outbound));
    }
    info!(name = %session.name, "relay started");

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                debug!(name = %session.name, "relay cancelled");
                break;
            }
            read = track.read_packet() => {
                let packet = match read {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!(error = %err, "inbound read failed, stopping relay");
                        break;
                    }
                };
                if let Err(err) = outbound.write_packet(&packet).await {
                    if err.is_closed_pipe() {
                        // No receiver attached right now; it may attach at
                        // any moment, so keep draining the sender.
                        continue;
                    }
                    warn!(error = %err, "outbound write failed, stopping relay");
                    break;
                }
            }
        }
    }

    registry.teardown(&session).await;
}
