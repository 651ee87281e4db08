//! Broker client sessions

use std::time::Duration;

use burrow_core::{Error, NamespaceHandle, NamespaceSet, NamespaceType, Result};
use burrow_namespace::Rooms;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::{Request, Response, RoomsRequest, SubspaceRequest, Subspaces};
use crate::channel::{HandleChannel, MAX_HANDLES};
use crate::codec::{Decoder, Encoder};
use crate::config::BrokerConfig;
use crate::service::{Termination, serve};
use crate::shutdown::Shutdown;
use crate::spacemaker::{Spacemaker, Spacer};

/// The requesting side of a broker session.
///
/// A session has at most one request outstanding at any time. Once an
/// exchange fails before its response was decoded, the session is broken:
/// a late response could otherwise be taken for the answer to a later
/// request, so all further requests fail with [`Error::Channel`].
#[derive(Debug)]
pub struct BrokerSession {
    channel: HandleChannel,
    encoder: Encoder,
    decoder: Decoder,
    response_deadline: Duration,
    service: Option<JoinHandle<Termination>>,
    broken: bool,
}

impl BrokerSession {
    /// Talk to the broker at the other end of `channel`.
    #[must_use]
    pub fn new(channel: HandleChannel) -> Self {
        Self {
            channel,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            response_deadline: BrokerConfig::default().response_deadline,
            service: None,
            broken: false,
        }
    }

    /// Set how long to wait for responses
    #[must_use]
    pub const fn with_response_deadline(mut self, deadline: Duration) -> Self {
        self.response_deadline = deadline;
        self
    }

    /// Start a broker service as a task in this process and connect to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: BrokerConfig, shutdown: Shutdown) -> Result<Self> {
        let spacemaker = Spacemaker::new(config.clone());
        Self::start_with(spacemaker, &config, shutdown)
    }

    /// Start a service task dispatching to the passed spacer and connect to
    /// it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with<S>(spacer: S, config: &BrokerConfig, shutdown: Shutdown) -> Result<Self>
    where
        S: Spacer + 'static,
    {
        let (ours, theirs) = HandleChannel::pair()?;
        let receive_deadline = config.receive_deadline;
        let service = tokio::spawn(async move {
            serve(&theirs, &spacer, &shutdown, receive_deadline).await
        });
        Ok(Self {
            service: Some(service),
            ..Self::new(ours).with_response_deadline(config.response_deadline)
        })
    }

    /// Request new user and/or PID namespaces.
    ///
    /// Returns a session with the broker serving inside the new namespaces,
    /// and handles to them.
    pub async fn subspace(&mut self, spaces: NamespaceSet) -> Result<(Self, Subspaces)> {
        match self.exchange(Request::Subspace(SubspaceRequest::new(spaces))).await? {
            Response::Subspace(resp) => {
                let channel = resp.channel.ok_or_else(|| Error::Decode {
                    message: "subspace response without channel".to_string(),
                })?;
                let session = Self::new(HandleChannel::from_fd(channel)?)
                    .with_response_deadline(self.response_deadline);
                Ok((session, resp.subspaces))
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Request new flat namespaces.
    pub async fn rooms(&mut self, spaces: NamespaceSet) -> Result<Rooms> {
        match self.exchange(Request::Rooms(RoomsRequest::new(spaces))).await? {
            Response::Rooms(resp) => Ok(resp.rooms),
            other => Err(unexpected(&other)),
        }
    }

    /// Request a single new flat namespace.
    pub async fn new_transient(&mut self, typ: NamespaceType) -> Result<NamespaceHandle> {
        let mut rooms = self.rooms(typ.into()).await?;
        rooms.take(typ).ok_or_else(|| Error::Broker {
            reason: format!("no {typ} namespace returned"),
        })
    }

    /// Whether an earlier exchange failed and left the session unusable
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    /// End the session, waiting for a service task started by this session.
    pub async fn close(self) -> Result<Option<Termination>> {
        drop(self.channel);
        match self.service {
            Some(service) => Ok(Some(service.await?)),
            None => Ok(None),
        }
    }

    async fn exchange(&mut self, request: Request) -> Result<Response> {
        if self.broken {
            return Err(Error::channel("session broken by an earlier failed exchange"));
        }

        debug!(?request, "Sending request");
        let payload = self.encoder.encode(&request)?;
        // Cleared only once a response to this request has been decoded.
        self.broken = true;
        self.channel.send(payload, &[]).await?;

        let received = self
            .channel
            .receive(self.decoder.buffer_mut(), MAX_HANDLES, Some(self.response_deadline))
            .await?;
        let mut response: Response = self.decoder.decode(received.len)?;
        self.broken = false;
        response.distribute_handles(received.handles, request.spaces());

        match response {
            Response::Error(err) => Err(Error::Broker { reason: err.reason }),
            response => Ok(response),
        }
    }
}

fn unexpected(response: &Response) -> Error {
    let kind = match response {
        Response::Subspace(_) => "subspace",
        Response::Rooms(_) => "rooms",
        Response::Error(_) => "error",
    };
    Error::Decode {
        message: format!("unexpected {kind} response"),
    }
}
