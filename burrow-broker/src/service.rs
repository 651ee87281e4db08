//! Broker service loop

use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use burrow_core::Error;
use tracing::{debug, error, info, warn};

use crate::api::{Request, Response};
use crate::channel::HandleChannel;
use crate::codec::{Decoder, Encoder};
use crate::shutdown::Shutdown;
use crate::spacemaker::Spacer;

/// Why a service loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The shutdown signal fired
    Cancelled,
    /// The client closed its channel end
    Disconnected,
    /// The client sent something that isn't a request
    ProtocolViolation,
    /// Sending or receiving failed
    ChannelFailure,
}

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "deep", "eager", "fuzzy", "gentle", "hidden", "icy", "jolly",
    "keen", "lucky", "mellow", "nimble", "quiet", "rapid", "shy", "tidy", "vivid", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "beaver", "dormouse", "ferret", "gopher", "hamster", "hedgehog", "lemming",
    "marmot", "meerkat", "mole", "otter", "prairiedog", "rabbit", "shrew", "vole", "wombat",
];

/// Generate a human-readable session id for diagnostics, like `calm-wombat`.
#[must_use]
pub fn session_id() -> String {
    let adjective = ADJECTIVES[rand::random::<usize>() % ADJECTIVES.len()];
    let noun = NOUNS[rand::random::<usize>() % NOUNS.len()];
    format!("{adjective}-{noun}")
}

/// Serve requests arriving on `channel` one after another until the client
/// disconnects, the shutdown signal fires, or the session breaks.
///
/// Shutdown is checked whenever no request arrived within
/// `receive_deadline`, and before each receive; a request being served is
/// always answered first.
pub async fn serve<S>(
    channel: &HandleChannel,
    spacer: &S,
    shutdown: &Shutdown,
    receive_deadline: Duration,
) -> Termination
where
    S: Spacer + ?Sized,
{
    let session_id = session_id();
    info!(%session_id, "Broker service started");

    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();

    let termination = loop {
        if shutdown.is_triggered() {
            break Termination::Cancelled;
        }

        let received = match channel
            .receive(decoder.buffer_mut(), 0, Some(receive_deadline))
            .await
        {
            Ok(received) => received,
            Err(Error::DeadlineExceeded) => continue,
            Err(Error::Disconnected) => break Termination::Disconnected,
            Err(e) => {
                error!(%session_id, error = %e, "Cannot receive request");
                break Termination::ChannelFailure;
            }
        };

        let request: Request = match decoder.decode(received.len) {
            Ok(request) => request,
            Err(e) => {
                error!(%session_id, error = %e, "Cannot decode request");
                break Termination::ProtocolViolation;
            }
        };
        debug!(%session_id, ?request, "Received request");

        let mut response = match request {
            Request::Subspace(req) => spacer.subspace(req).await,
            Request::Rooms(req) => spacer.rooms(req).await,
        };
        if let Response::Error(ref err) = response {
            warn!(%session_id, reason = %err.reason, "Request failed");
        }

        // Handles are sent out-of-band only; our copies close once sent.
        let handles = response.take_handles();
        let payload = match encoder.encode(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%session_id, error = %e, "Cannot encode response");
                break Termination::ProtocolViolation;
            }
        };
        let borrowed: Vec<BorrowedFd<'_>> = handles.iter().map(AsFd::as_fd).collect();
        if let Err(e) = channel.send(payload, &borrowed).await {
            error!(%session_id, error = %e, "Cannot send response");
            break Termination::ChannelFailure;
        }
    };

    info!(%session_id, ?termination, "Broker service stopped");
    termination
}
