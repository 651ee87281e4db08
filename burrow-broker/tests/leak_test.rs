//! Descriptor leak checks.
//!
//! Kept in an integration test binary of its own with a single test, so that
//! no concurrently running test opens or closes descriptors meanwhile.

use burrow_broker::{BrokerConfig, BrokerSession, Shutdown};
use burrow_core::{NamespaceSet, NamespaceType};
use std::time::Duration;

fn is_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[tokio::test(flavor = "current_thread")]
async fn test_no_descriptor_leaks() {
    let config = BrokerConfig::new().with_receive_deadline(Duration::from_millis(50));
    let mut session = BrokerSession::start(config.clone(), Shutdown::never()).unwrap();
    // warm up lazily opened runtime descriptors
    let _ = session.rooms(NamespaceSet::EMPTY).await;
    let before = open_fds();

    // invalid requests are rejected before anything gets created
    let invalid_rooms = [
        NamespaceSet::EMPTY,
        NamespaceSet::from(NamespaceType::Pid),
        NamespaceSet::of([NamespaceType::Net, NamespaceType::User]),
    ];
    for spaces in invalid_rooms {
        assert!(session.rooms(spaces).await.is_err());
    }
    let invalid_subspaces = [
        NamespaceSet::EMPTY,
        NamespaceSet::from(NamespaceType::Mount),
        NamespaceSet::of([NamespaceType::User, NamespaceType::Uts]),
    ];
    for spaces in invalid_subspaces {
        assert!(session.subspace(spaces).await.is_err());
    }
    assert_eq!(open_fds(), before);

    if !is_root() {
        return;
    }

    let rooms = session
        .rooms(NamespaceSet::of([NamespaceType::Net, NamespaceType::Uts]))
        .await
        .unwrap();
    assert_eq!(open_fds(), before + 2);
    drop(rooms);
    assert_eq!(open_fds(), before);

    let mut failing = BrokerSession::start(
        config.with_executable("/nonexistent/burrow"),
        Shutdown::never(),
    )
    .unwrap();
    let _ = failing.rooms(NamespaceSet::EMPTY).await;
    let before = open_fds();
    assert!(
        failing
            .subspace(NamespaceSet::of(NamespaceType::HIERARCHICAL))
            .await
            .is_err()
    );
    assert_eq!(open_fds(), before);
}
