//! The pairing registry: a single receiver slot, at most one sender attempt
//! under it, and the state machine that moves an attempt from pending to
//! forwarding.
//!
//! Locking discipline: the slot mutex first, then a sender's state mutex,
//! never the reverse, and neither is ever held across an `.await`. Engine
//! handles are cloned out under the lock and used afterwards.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use media_engine::{
    Connection, EngineError, IceServer, MediaEngine, OutboundTrack, SessionDescription,
    TransceiverDirection,
};

use crate::config::Config;
use crate::relay;
use crate::session::{generate_challenge_code, generate_token};
use crate::signaling;

pub type SharedRegistry = Arc<PairingRegistry>;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("receiver already claimed")]
    SlotClaimed,
    #[error("no receiver claimed")]
    Unclaimed,
    #[error("credentials do not match")]
    Forbidden,
    #[error("another sender attempt is active")]
    SenderExists,
    #[error("no sender attempt in progress")]
    NoSender,
    #[error("no forwarding track available yet")]
    NoForwardingTrack,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Where a sender attempt is in its lifecycle. Strictly monotonic: phases
/// only ever move forward, and teardown removes the whole session instead of
/// winding the phase back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SenderPhase {
    Pending,
    Accepted,
    Connected,
}

/// Snapshot of the slot reported to the polling receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    SenderAttempt {
        name: String,
        code: String,
        accepted: bool,
        connected: bool,
    },
}

pub struct SenderSession {
    pub(crate) token: String,
    pub(crate) name: String,
    pub(crate) challenge: String,
    /// Cancels the relay task at teardown; fires at most once.
    pub(crate) cancel: CancellationToken,
    pub(crate) state: Mutex<SenderState>,
}

pub struct SenderState {
    pub(crate) phase: SenderPhase,
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) forwarding: Option<Arc<dyn OutboundTrack>>,
}

struct ReceiverSlot {
    token: String,
    sender: Option<Arc<SenderSession>>,
    /// Receiver-facing connection, created lazily on the first signaling
    /// exchange and replaced on later ones.
    outbound: Option<Arc<dyn Connection>>,
}

pub struct PairingRegistry {
    engine: Arc<dyn MediaEngine>,
    ice_servers: Vec<IceServer>,
    gathering_timeout: Duration,
    token_length: usize,
    challenge_length: usize,
    slot: Mutex<Option<ReceiverSlot>>,
}

impl PairingRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &Config) -> Self {
        let ice_servers = config
            .ice_urls
            .iter()
            .map(|url| IceServer::stun(url.clone()))
            .collect();
        Self {
            engine,
            ice_servers,
            gathering_timeout: config.ice_gathering_timeout,
            token_length: config.token_length,
            challenge_length: config.challenge_length,
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// Claim the receiver slot. Exactly one of any number of concurrent
    /// claims wins; the rest see `SlotClaimed`.
    pub fn claim(&self) -> Result<String, PairingError> {
        let mut guard = self.slot.lock();
        if guard.is_some() {
            return Err(PairingError::SlotClaimed);
        }
        let token = generate_token(self.token_length);
        *guard = Some(ReceiverSlot {
            token: token.clone(),
            sender: None,
            outbound: None,
        });
        info!("receiver slot claimed");
        Ok(token)
    }

    /// Un-claim the slot, tearing down any sender attempt and closing every
    /// connection the slot owns.
    pub async fn release(&self, token: &str) -> Result<(), PairingError> {
        let slot = {
            let mut guard = self.slot.lock();
            match guard.as_ref() {
                None => return Err(PairingError::Unclaimed),
                Some(slot) if slot.token != token => return Err(PairingError::Forbidden),
                Some(_) => guard.take(),
            }
        };
        let Some(slot) = slot else {
            return Ok(());
        };

        if let Some(session) = slot.sender {
            session.cancel.cancel();
            let connection = session.state.lock().connection.take();
            if let Some(connection) = connection {
                connection.close().await;
            }
        }
        if let Some(outbound) = slot.outbound {
            outbound.close().await;
        }
        info!("receiver slot released");
        Ok(())
    }

    /// Report a consistent snapshot of the slot to the polling receiver.
    pub fn check_state(&self, token: &str) -> Result<SlotStatus, PairingError> {
        let guard = self.slot.lock();
        let slot = guard.as_ref().ok_or(PairingError::Unclaimed)?;
        if slot.token != token {
            return Err(PairingError::Forbidden);
        }
        match &slot.sender {
            None => Ok(SlotStatus::Idle),
            Some(session) => {
                let phase = session.state.lock().phase;
                Ok(SlotStatus::SenderAttempt {
                    name: session.name.clone(),
                    code: session.challenge.clone(),
                    accepted: phase >= SenderPhase::Accepted,
                    connected: phase == SenderPhase::Connected,
                })
            }
        }
    }

    /// Attach a new sender attempt with fresh credentials.
    pub fn create_sender(&self, name: &str) -> Result<String, PairingError> {
        let mut guard = self.slot.lock();
        let slot = guard.as_mut().ok_or(PairingError::Unclaimed)?;
        if slot.sender.is_some() {
            return Err(PairingError::SenderExists);
        }
        let session = Arc::new(SenderSession {
            token: generate_token(self.token_length),
            name: name.to_string(),
            challenge: generate_challenge_code(self.challenge_length),
            cancel: CancellationToken::new(),
            state: Mutex::new(SenderState {
                phase: SenderPhase::Pending,
                connection: None,
                forwarding: None,
            }),
        });
        let token = session.token.clone();
        slot.sender = Some(session);
        info!(name, "sender attempt created");
        Ok(token)
    }

    /// Check the sender's token and challenge code. Both must match exactly;
    /// a mismatch changes nothing. Accepting twice is harmless.
    pub fn verify(&self, token: &str, code: &str) -> Result<(), PairingError> {
        let session = self.current_sender().ok_or(PairingError::NoSender)?;
        if session.token != token || session.challenge != code {
            return Err(PairingError::Forbidden);
        }
        let mut state = session.state.lock();
        if state.phase == SenderPhase::Pending {
            state.phase = SenderPhase::Accepted;
            info!(name = %session.name, "sender attempt accepted");
        }
        Ok(())
    }

    /// Drive the sender-side offer/answer exchange. Only valid once the
    /// attempt has been accepted. On success the connection's inbound track
    /// will start the relay forwarder whenever media arrives.
    pub async fn sender_signal(
        self: Arc<Self>,
        token: &str,
        offer: SessionDescription,
    ) -> Result<SessionDescription, PairingError> {
        let session = self.current_sender().ok_or(PairingError::NoSender)?;
        {
            let state = session.state.lock();
            if session.token != token || state.phase < SenderPhase::Accepted {
                return Err(PairingError::Forbidden);
            }
        }

        let connection = self.engine.new_connection(&self.ice_servers).await?;

        // Callbacks go in before negotiation so a fast peer cannot race
        // past them.
        {
            let registry = Arc::clone(&self);
            let session = Arc::clone(&session);
            connection.on_inbound_track(Box::new(move |track| {
                relay::spawn_forwarder(Arc::clone(&registry), Arc::clone(&session), track);
            }));
        }
        {
            let registry = Arc::clone(&self);
            let session = Arc::clone(&session);
            connection.on_state_change(Box::new(move |event| {
                if event.is_terminal() {
                    warn!(name = %session.name, ?event, "sender connection lost");
                    let registry = Arc::clone(&registry);
                    let session = Arc::clone(&session);
                    tokio::spawn(async move {
                        registry.teardown(&session).await;
                    });
                } else {
                    let mut state = session.state.lock();
                    if state.phase == SenderPhase::Accepted {
                        state.phase = SenderPhase::Connected;
                        info!(name = %session.name, "sender connected");
                    }
                }
            }));
        }

        // A repeat exchange replaces the previous connection; the flow
        // always restarts from a fresh offer.
        let previous = {
            let mut state = session.state.lock();
            state.connection.replace(Arc::clone(&connection))
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        // Teardown may have removed the session while the connection was
        // being created. A connection stored on a removed session is never
        // closed by anyone else, so it gets withdrawn and closed here.
        let torn_down = session.cancel.is_cancelled()
            || !self
                .current_sender()
                .is_some_and(|current| Arc::ptr_eq(&current, &session));
        if torn_down {
            {
                let mut state = session.state.lock();
                if state
                    .connection
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &connection))
                {
                    state.connection = None;
                }
            }
            connection.close().await;
            return Err(PairingError::Forbidden);
        }

        match signaling::answer_offer(
            connection.as_ref(),
            offer,
            Some(TransceiverDirection::RecvOnly),
            None,
            self.gathering_timeout,
        )
        .await
        {
            Ok(answer) => Ok(answer),
            Err(err) => {
                error!(error = %err, "sender signaling exchange failed");
                {
                    let mut state = session.state.lock();
                    if state
                        .connection
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, &connection))
                    {
                        state.connection = None;
                    }
                }
                connection.close().await;
                Err(err.into())
            }
        }
    }

    /// Drive the receiver-side offer/answer exchange. Requires a forwarding
    /// track, which only exists once the relay has seen the inbound track.
    pub async fn receiver_signal(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, PairingError> {
        let forwarding = {
            let guard = self.slot.lock();
            let slot = guard.as_ref().ok_or(PairingError::Unclaimed)?;
            let session = slot.sender.as_ref().ok_or(PairingError::NoForwardingTrack)?;
            let state = session.state.lock();
            state
                .forwarding
                .clone()
                .ok_or(PairingError::NoForwardingTrack)?
        };

        let connection = self.engine.new_connection(&self.ice_servers).await?;
        let answer = match signaling::answer_offer(
            connection.as_ref(),
            offer,
            None,
            Some(forwarding),
            self.gathering_timeout,
        )
        .await
        {
            Ok(answer) => answer,
            Err(err) => {
                error!(error = %err, "receiver signaling exchange failed");
                connection.close().await;
                return Err(err.into());
            }
        };

        let (stored, previous) = {
            let mut guard = self.slot.lock();
            match guard.as_mut() {
                Some(slot) => (true, slot.outbound.replace(Arc::clone(&connection))),
                None => (false, None),
            }
        };
        if !stored {
            // Slot released while the exchange was in flight.
            connection.close().await;
            return Err(PairingError::Unclaimed);
        }
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(answer)
    }

    /// The single teardown path. Removes the session from the slot (only if
    /// it is still the current one), cancels its relay task and closes its
    /// connection. Safe to call from multiple places; later calls no-op.
    pub(crate) async fn teardown(&self, session: &Arc<SenderSession>) {
        let removed = {
            let mut guard = self.slot.lock();
            match guard.as_mut() {
                Some(slot)
                    if slot
                        .sender
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, session)) =>
                {
                    slot.sender.take()
                }
                _ => None,
            }
        };
        let Some(removed) = removed else {
            return;
        };
        removed.cancel.cancel();
        let connection = removed.state.lock().connection.take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        info!(name = %removed.name, "sender torn down, slot open for a new attempt");
    }

    pub(crate) fn current_sender(&self) -> Option<Arc<SenderSession>> {
        self.slot.lock().as_ref().and_then(|slot| slot.sender.clone())
    }
}
