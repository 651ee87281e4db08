use async_trait::async_trait;
use burrow_broker::api::{RoomsResponse, SubspaceResponse};
use burrow_broker::*;
use burrow_core::{Error, NamespaceHandle, NamespaceSet, NamespaceType};
use burrow_namespace::Rooms;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Answers rooms requests with handles to the caller's current namespaces,
/// and records what it was asked for.
#[derive(Default)]
struct ScriptedSpacer {
    requests: Mutex<Vec<Request>>,
}

#[async_trait]
impl Spacer for ScriptedSpacer {
    async fn subspace(&self, req: SubspaceRequest) -> Response {
        self.requests.lock().unwrap().push(Request::Subspace(req));
        if let Err(e) = req.validate() {
            return e.into();
        }
        let (ours, _theirs) = HandleChannel::socketpair().unwrap();
        Response::Subspace(SubspaceResponse {
            channel: Some(ours),
            subspaces: Subspaces {
                user: None,
                pid: Some(NamespaceHandle::current(NamespaceType::Pid).unwrap()),
            },
        })
    }

    async fn rooms(&self, req: RoomsRequest) -> Response {
        self.requests.lock().unwrap().push(Request::Rooms(req));
        if let Err(e) = req.validate() {
            return e.into();
        }
        let mut rooms = Rooms::default();
        for typ in req.spaces.iter() {
            rooms
                .insert(typ, NamespaceHandle::current(typ).unwrap())
                .unwrap();
        }
        Response::Rooms(RoomsResponse { rooms })
    }
}

/// Like [`ScriptedSpacer`], but sleeps before answering the first request.
struct SlowStartSpacer {
    inner: ScriptedSpacer,
    delay: Duration,
    first: AtomicBool,
}

impl SlowStartSpacer {
    fn new(delay: Duration) -> Self {
        Self {
            inner: ScriptedSpacer::default(),
            delay,
            first: AtomicBool::new(true),
        }
    }

    async fn stall(&self) {
        if self.first.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl Spacer for SlowStartSpacer {
    async fn subspace(&self, req: SubspaceRequest) -> Response {
        self.stall().await;
        self.inner.subspace(req).await
    }

    async fn rooms(&self, req: RoomsRequest) -> Response {
        self.stall().await;
        self.inner.rooms(req).await
    }
}

fn fast_config() -> BrokerConfig {
    BrokerConfig::new().with_receive_deadline(Duration::from_millis(50))
}

#[tokio::test]
async fn test_rooms_handles_arrive_by_kind() {
    let mut session =
        BrokerSession::start_with(ScriptedSpacer::default(), &fast_config(), Shutdown::never())
            .unwrap();

    let spaces = NamespaceSet::of([NamespaceType::Net, NamespaceType::Uts]);
    let rooms = session.rooms(spaces).await.unwrap();

    assert_eq!(rooms.spaces(), spaces);
    assert_eq!(rooms.net.as_ref().unwrap().kind().unwrap(), NamespaceType::Net);
    assert_eq!(rooms.uts.as_ref().unwrap().kind().unwrap(), NamespaceType::Uts);
    assert!(rooms.cgroup.is_none());
    assert!(rooms.ipc.is_none());
    assert!(rooms.mount.is_none());
    assert!(rooms.time.is_none());
}

#[tokio::test]
async fn test_new_transient_returns_single_handle() {
    let mut session =
        BrokerSession::start_with(ScriptedSpacer::default(), &fast_config(), Shutdown::never())
            .unwrap();

    let ipc = session.new_transient(NamespaceType::Ipc).await.unwrap();
    assert_eq!(ipc.kind().unwrap(), NamespaceType::Ipc);
}

#[tokio::test]
async fn test_subspace_returns_working_channel() {
    let mut session =
        BrokerSession::start_with(ScriptedSpacer::default(), &fast_config(), Shutdown::never())
            .unwrap();

    let (child, subspaces) = session.subspace(NamespaceType::Pid.into()).await.unwrap();
    assert!(subspaces.user.is_none());
    assert_eq!(
        subspaces.pid.as_ref().unwrap().kind().unwrap(),
        NamespaceType::Pid
    );
    // nobody serves the scripted child channel
    assert!(child.close().await.unwrap().is_none());
}

#[tokio::test]
async fn test_requests_are_served_in_order() {
    let (client, server) = HandleChannel::pair().unwrap();
    let spacer = ScriptedSpacer::default();
    let shutdown = Shutdown::never();

    let serving = serve(&server, &spacer, &shutdown, Duration::from_millis(50));
    let requesting = async {
        let mut session = BrokerSession::new(client);
        session.rooms(NamespaceType::Net.into()).await.unwrap();
        session.rooms(NamespaceType::Cgroup.into()).await.unwrap();
        let _ = session.rooms(NamespaceType::User.into()).await.unwrap_err();
    };
    let (termination, ()) = tokio::join!(serving, requesting);

    assert_eq!(termination, Termination::Disconnected);
    let requests = spacer.requests.lock().unwrap();
    assert_eq!(
        *requests,
        vec![
            Request::Rooms(RoomsRequest::new(NamespaceType::Net.into())),
            Request::Rooms(RoomsRequest::new(NamespaceType::Cgroup.into())),
            Request::Rooms(RoomsRequest::new(NamespaceType::User.into())),
        ]
    );
}

#[tokio::test]
async fn test_disconnect_while_waiting_terminates_cleanly() {
    let (client, server) = HandleChannel::pair().unwrap();
    let spacer = ScriptedSpacer::default();
    let shutdown = Shutdown::never();

    let serving = serve(&server, &spacer, &shutdown, Duration::from_millis(20));
    let closing = async {
        // let the loop pass through a few deadlines first
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(client);
    };
    let (termination, ()) = tokio::join!(serving, closing);

    assert_eq!(termination, Termination::Disconnected);
    assert!(spacer.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_loop() {
    let (_client, server) = HandleChannel::pair().unwrap();
    let spacer = ScriptedSpacer::default();
    let (trigger, shutdown) = Shutdown::new();
    trigger.trigger();

    let termination = serve(&server, &spacer, &shutdown, Duration::from_millis(20)).await;
    assert_eq!(termination, Termination::Cancelled);
}

#[tokio::test]
async fn test_garbage_is_protocol_violation() {
    let (client, server) = HandleChannel::pair().unwrap();
    let spacer = ScriptedSpacer::default();
    let shutdown = Shutdown::never();

    client.send(b"{\"type\":\"Teleport\"}", &[]).await.unwrap();
    let termination = serve(&server, &spacer, &shutdown, Duration::from_millis(20)).await;
    assert_eq!(termination, Termination::ProtocolViolation);
    assert!(spacer.requests.lock().unwrap().is_empty());

    // nothing was answered before the broker hung up
    drop(server);
    let mut buf = [0u8; 64];
    let err = client.receive(&mut buf, 0, Some(Duration::from_secs(1))).await;
    assert!(matches!(err, Err(Error::Disconnected)));
}

#[tokio::test]
async fn test_response_deadline() {
    let (client, _server) = HandleChannel::pair().unwrap();
    let mut session = BrokerSession::new(client).with_response_deadline(Duration::from_millis(50));
    let err = session.rooms(NamespaceType::Net.into()).await.unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_late_response_breaks_session() {
    let config = fast_config().with_response_deadline(Duration::from_millis(50));
    let spacer = SlowStartSpacer::new(Duration::from_millis(200));
    let mut session = BrokerSession::start_with(spacer, &config, Shutdown::never()).unwrap();

    let err = session.rooms(NamespaceType::Net.into()).await.unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(session.is_broken());

    // the net response arrives meanwhile and must not answer the uts request
    tokio::time::sleep(Duration::from_millis(300)).await;
    let err = session.rooms(NamespaceType::Uts.into()).await.unwrap_err();
    assert!(matches!(err, Error::Channel { .. }));

    assert_eq!(session.close().await.unwrap(), Some(Termination::Disconnected));
}

#[tokio::test]
async fn test_broker_error_keeps_session_usable() {
    let mut session =
        BrokerSession::start_with(ScriptedSpacer::default(), &fast_config(), Shutdown::never())
            .unwrap();

    let err = session.rooms(NamespaceType::Pid.into()).await.unwrap_err();
    assert!(matches!(err, Error::Broker { .. }));
    assert!(!session.is_broken());

    let rooms = session.rooms(NamespaceType::Uts.into()).await.unwrap();
    assert_eq!(rooms.spaces(), NamespaceSet::from(NamespaceType::Uts));
}

#[tokio::test]
#[ignore] // Requires root
async fn test_real_rooms_net_uts() {
    let mut session = BrokerSession::start(fast_config(), Shutdown::never()).unwrap();
    let rooms = session
        .rooms(NamespaceSet::of([NamespaceType::Net, NamespaceType::Uts]))
        .await
        .unwrap();

    let own_net = burrow_core::handle::current_ino(NamespaceType::Net).unwrap();
    assert_ne!(rooms.net.as_ref().unwrap().ino().unwrap(), own_net);
    assert_eq!(rooms.uts.as_ref().unwrap().kind().unwrap(), NamespaceType::Uts);
}

#[tokio::test]
#[ignore] // Requires root
async fn test_real_subspace_with_missing_executable() {
    let config = fast_config().with_executable("/nonexistent/burrow");
    let mut session = BrokerSession::start(config, Shutdown::never()).unwrap();
    let err = session
        .subspace(NamespaceSet::of(NamespaceType::HIERARCHICAL))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Broker { ref reason } if reason.contains("/nonexistent/burrow")));
}
