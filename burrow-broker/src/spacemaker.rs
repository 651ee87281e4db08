//! Namespace creation behind the broker service

use async_trait::async_trait;
use burrow_core::{Error, NamespaceHandle, NamespaceType, Result};
use burrow_namespace::{SpawnConfig, new_rooms, spawn_broker};
use std::os::fd::AsFd;
use tracing::{error, info};

use crate::api::{Response, RoomsRequest, RoomsResponse, SubspaceRequest, SubspaceResponse, Subspaces};
use crate::channel::HandleChannel;
use crate::config::BrokerConfig;

/// Serves the requests a broker service loop dispatches.
///
/// Implementations answer every request with exactly one response; failures
/// are reported as [`Response::Error`] after closing anything partially
/// created.
#[async_trait]
pub trait Spacer: Send + Sync {
    /// Create new hierarchical namespaces together with a broker inside them
    async fn subspace(&self, req: SubspaceRequest) -> Response;

    /// Create new flat namespaces
    async fn rooms(&self, req: RoomsRequest) -> Response;
}

/// Creates namespaces for real
#[derive(Debug, Clone, Default)]
pub struct Spacemaker {
    config: BrokerConfig,
}

impl Spacemaker {
    /// Create a spacemaker starting child brokers as configured
    #[must_use]
    pub const fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

/// Start a child broker in new namespaces and open those.
///
/// Blocks until the child has exec'ed or failed to.
fn make_subspace(config: &SpawnConfig, req: SubspaceRequest) -> Result<SubspaceResponse> {
    req.validate()?;

    // One end goes to the child broker, the other back to the requester.
    let (ours, theirs) = HandleChannel::socketpair()?;
    let broker = spawn_broker(config, req.spaces, theirs.as_fd())?;
    drop(theirs);
    let pid = broker.pid().as_raw();
    broker.reap_in_background();

    let open = |typ: NamespaceType| -> Result<Option<NamespaceHandle>> {
        if req.spaces.contains(typ) {
            NamespaceHandle::of_process(pid, typ).map(Some)
        } else {
            Ok(None)
        }
    };
    let subspaces = Subspaces {
        user: open(NamespaceType::User)?,
        pid: open(NamespaceType::Pid)?,
    };

    info!(pid, namespaces = %req.spaces, "Created subspace");
    Ok(SubspaceResponse {
        channel: Some(ours),
        subspaces,
    })
}

#[async_trait]
impl Spacer for Spacemaker {
    async fn subspace(&self, req: SubspaceRequest) -> Response {
        let config = self.config.spawn_config();
        let outcome = tokio::task::spawn_blocking(move || make_subspace(&config, req))
            .await
            .map_err(Error::from)
            .and_then(|made| made);
        match outcome {
            Ok(resp) => Response::Subspace(resp),
            Err(e) => {
                error!(namespaces = %req.spaces, error = %e, "Cannot create subspace");
                e.into()
            }
        }
    }

    async fn rooms(&self, req: RoomsRequest) -> Response {
        if let Err(e) = req.validate() {
            return e.into();
        }
        match new_rooms(req.spaces).await {
            Ok(rooms) => {
                info!(namespaces = %req.spaces, "Created rooms");
                Response::Rooms(RoomsResponse { rooms })
            }
            Err(e) => {
                error!(namespaces = %req.spaces, error = %e, "Cannot create rooms");
                e.into()
            }
        }
    }
}
