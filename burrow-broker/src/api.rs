//! Broker protocol messages
//!
//! Requests and responses form two closed families of tagged values. Handle
//! fields are never serialized: before sending, they are moved out into the
//! message's auxiliary handles; after receiving, auxiliary handles are moved
//! back into the decoded message according to their kernel-reported type.

use std::os::fd::{AsFd, OwnedFd};

use burrow_core::handle::kind_of;
use burrow_core::{Error, NamespaceHandle, NamespaceSet, NamespaceType, Result};
use burrow_namespace::Rooms;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A request sent from a client to a broker service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create new user and/or PID namespaces
    Subspace(SubspaceRequest),
    /// Create new flat namespaces
    Rooms(RoomsRequest),
}

impl Request {
    /// The namespace types this request asks for
    #[must_use]
    pub const fn spaces(&self) -> NamespaceSet {
        match self {
            Self::Subspace(req) => req.spaces,
            Self::Rooms(req) => req.spaces,
        }
    }
}

/// Request for new hierarchical namespaces, served by a new child broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubspaceRequest {
    /// Requested types; only user and PID are allowed
    pub spaces: NamespaceSet,
}

impl SubspaceRequest {
    /// Create a request for the passed types
    #[must_use]
    pub const fn new(spaces: NamespaceSet) -> Self {
        Self { spaces }
    }

    /// Check the request before anything gets created.
    pub fn validate(&self) -> Result<()> {
        validate_spaces(self.spaces, NamespaceSet::of(NamespaceType::HIERARCHICAL))
    }
}

/// Request for new flat namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomsRequest {
    /// Requested types; only cgroup, IPC, mount, network, time and UTS are
    /// allowed
    pub spaces: NamespaceSet,
}

impl RoomsRequest {
    /// Create a request for the passed types
    #[must_use]
    pub const fn new(spaces: NamespaceSet) -> Self {
        Self { spaces }
    }

    /// Check the request before anything gets created.
    pub fn validate(&self) -> Result<()> {
        validate_spaces(self.spaces, NamespaceSet::of(NamespaceType::FLAT))
    }
}

fn validate_spaces(spaces: NamespaceSet, allowed: NamespaceSet) -> Result<()> {
    if spaces.bits() & !allowed.bits() != 0 {
        return Err(Error::invalid_request(format!("out of space: {spaces}")));
    }
    if spaces.is_empty() {
        return Err(Error::invalid_request("no space requested"));
    }
    Ok(())
}

/// A response sent from a broker service back to its client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// New hierarchical namespaces and a channel to their broker
    Subspace(SubspaceResponse),
    /// New flat namespaces
    Rooms(RoomsResponse),
    /// The request failed
    Error(ErrorResponse),
}

/// Handles to newly created user and PID namespaces
#[derive(Debug, Default)]
pub struct Subspaces {
    /// User namespace, if requested
    pub user: Option<NamespaceHandle>,
    /// PID namespace, if requested
    pub pid: Option<NamespaceHandle>,
}

/// Answer to a [`SubspaceRequest`]
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SubspaceResponse {
    /// Channel end connected to the child broker serving the new namespaces
    #[serde(skip)]
    pub channel: Option<OwnedFd>,
    /// The new namespaces
    #[serde(skip)]
    pub subspaces: Subspaces,
}

/// Answer to a [`RoomsRequest`]
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RoomsResponse {
    /// The new namespaces
    #[serde(skip)]
    pub rooms: Rooms,
}

/// Failure of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason
    pub reason: String,
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        Self::Error(ErrorResponse {
            reason: err.to_string(),
        })
    }
}

impl Response {
    /// Move every handle out of this response, in fixed order, leaving the
    /// handle fields absent.
    ///
    /// The order is channel, user, pid for subspaces and cgroup, ipc, mnt,
    /// net, time, uts for rooms.
    pub fn take_handles(&mut self) -> Vec<OwnedFd> {
        match self {
            Self::Subspace(resp) => [
                resp.channel.take(),
                resp.subspaces.user.take().map(OwnedFd::from),
                resp.subspaces.pid.take().map(OwnedFd::from),
            ]
            .into_iter()
            .flatten()
            .collect(),
            Self::Rooms(resp) => NamespaceType::FLAT
                .into_iter()
                .filter_map(|typ| resp.rooms.take(typ).map(OwnedFd::from))
                .collect(),
            Self::Error(_) => Vec::new(),
        }
    }

    /// Move received handles into the matching fields of this response.
    ///
    /// For subspaces the first handle is the channel. Namespace handles are
    /// matched by their kernel-reported type; handles of a type outside
    /// `wanted`, or matching no field or a field already set, are closed.
    pub fn distribute_handles(&mut self, handles: Vec<OwnedFd>, wanted: NamespaceSet) {
        let mut handles = handles.into_iter();
        match self {
            Self::Subspace(resp) => {
                resp.channel = handles.next();
                for fd in handles {
                    let slot = match kind_of(fd.as_fd()) {
                        Ok(typ) if !wanted.contains(typ) => {
                            debug!(namespace = %typ, "Closing handle of unrequested type");
                            continue;
                        }
                        Ok(NamespaceType::User) => &mut resp.subspaces.user,
                        Ok(NamespaceType::Pid) => &mut resp.subspaces.pid,
                        _ => {
                            debug!("Closing unexpected handle");
                            continue;
                        }
                    };
                    if slot.is_none() {
                        *slot = Some(NamespaceHandle::from_fd(fd));
                    }
                }
            }
            Self::Rooms(resp) => {
                for fd in handles {
                    let Ok(typ) = kind_of(fd.as_fd()) else {
                        debug!("Closing handle not referencing a namespace");
                        continue;
                    };
                    if !wanted.contains(typ) {
                        debug!(namespace = %typ, "Closing handle of unrequested type");
                        continue;
                    }
                    match resp.rooms.slot_mut(typ) {
                        Some(slot) if slot.is_none() => *slot = Some(NamespaceHandle::from_fd(fd)),
                        _ => debug!(namespace = %typ, "Closing unexpected handle"),
                    }
                }
            }
            Self::Error(_) => {
                if handles.len() > 0 {
                    debug!("Closing handles sent along with an error");
                }
            }
        }
    }
}
