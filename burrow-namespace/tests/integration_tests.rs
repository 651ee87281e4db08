use burrow_core::handle::current_ino;
use burrow_core::{Error, NamespaceHandle, NamespaceSet, NamespaceType};
use burrow_namespace::*;
use std::os::unix::process::ExitStatusExt;
use std::panic;
use std::process::Command;

/// Set when the test binary is re-executed to fail on a plain thread.
const PLAIN_THREAD_CHILD: &str = "BURROW_TEST_PLAIN_THREAD_CHILD";

/// Drop all privileges of the calling thread only, so that switching back
/// into the original namespaces gets refused.
fn drop_thread_privileges() {
    // SAFETY: raw syscall affecting only the calling thread.
    unsafe { libc::syscall(libc::SYS_setresuid, 65534, 65534, 65534) };
}

#[test]
fn test_execute_without_handles() {
    let value = execute(&[], || 42).unwrap();
    assert_eq!(value, 42);
}

#[test]
fn test_execute_in_current_namespaces_restores() {
    let net = NamespaceHandle::current(NamespaceType::Net).unwrap();
    let uts = NamespaceHandle::current(NamespaceType::Uts).unwrap();
    let before = current_ino(NamespaceType::Net).unwrap();

    // Re-entering the current namespaces needs privileges; without them
    // execute reports an error instead of running the closure.
    if let Ok(inside) = execute(&[&net, &uts], || current_ino(NamespaceType::Net).unwrap()) {
        assert_eq!(inside, before);
    }
    assert_eq!(current_ino(NamespaceType::Net).unwrap(), before);
    assert!(!worker::is_tainted());
}

#[test]
fn test_execute_rejects_user_namespace() {
    let user = NamespaceHandle::current(NamespaceType::User).unwrap();
    let net = NamespaceHandle::current(NamespaceType::Net).unwrap();
    let result = execute(&[&net, &user], || ());
    assert!(matches!(result, Err(Error::UserNamespaceSwitch)));
}

#[test]
#[ignore] // Requires root
fn test_execute_in_transient_net() {
    let net = new_transient(NamespaceType::Net).unwrap();
    let want = net.ino().unwrap();
    let before = current_ino(NamespaceType::Net).unwrap();

    let inside = execute(&[&net], || current_ino(NamespaceType::Net).unwrap()).unwrap();
    assert_eq!(inside, want);
    assert_eq!(current_ino(NamespaceType::Net).unwrap(), before);
}

#[test]
#[ignore] // Requires root
fn test_execute_in_transient_mount_and_uts() {
    let mnt = new_transient(NamespaceType::Mount).unwrap();
    let uts = new_transient(NamespaceType::Uts).unwrap();
    let (want_mnt, want_uts) = (mnt.ino().unwrap(), uts.ino().unwrap());
    let net_before = current_ino(NamespaceType::Net).unwrap();

    let (inside_mnt, inside_uts, inside_net) = execute(&[&uts, &mnt], || {
        (
            current_ino(NamespaceType::Mount).unwrap(),
            current_ino(NamespaceType::Uts).unwrap(),
            current_ino(NamespaceType::Net).unwrap(),
        )
    })
    .unwrap();
    assert_eq!(inside_mnt, want_mnt);
    assert_eq!(inside_uts, want_uts);
    assert_eq!(inside_net, net_before);
}

#[test]
#[ignore] // Requires root
fn test_restoration_failure_taints_thread() {
    let worker = DisposableWorker::spawn("test-restoration", || {
        let net = new_transient(NamespaceType::Net).unwrap();
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _ = execute(&[&net], drop_thread_privileges);
        }));
        let payload = outcome.unwrap_err();
        let namespace = match payload.downcast_ref::<Error>() {
            Some(Error::Restoration { namespace, .. }) => Some(*namespace),
            _ => None,
        };
        let refused = matches!(execute(&[], || ()), Err(Error::TaintedThread));
        (namespace, refused)
    })
    .unwrap();

    let (namespace, refused) = worker.join();
    assert_eq!(namespace, Some(NamespaceType::Net));
    assert!(refused);
}

#[test]
#[ignore] // Requires root
fn test_restoration_failure_aborts_plain_thread() {
    if std::env::var_os(PLAIN_THREAD_CHILD).is_some() {
        // Runs on the test harness thread, which isn't a disposable worker.
        let net = new_transient(NamespaceType::Net).unwrap();
        let _ = execute(&[&net], drop_thread_privileges);
        panic!("restoration failure went unnoticed");
    }

    let output = Command::new(std::env::current_exe().unwrap())
        .args([
            "--exact",
            "test_restoration_failure_aborts_plain_thread",
            "--ignored",
            "--test-threads=1",
        ])
        .env(PLAIN_THREAD_CHILD, "1")
        .output()
        .unwrap();
    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
}

#[test]
#[ignore] // Requires root
fn test_restoration_failure_aborts_runtime_worker() {
    if std::env::var_os(PLAIN_THREAD_CHILD).is_some() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let net = new_transient(NamespaceType::Net).unwrap();
        runtime.block_on(async move {
            let _ = tokio::spawn(async move {
                let _ = execute(&[&net], drop_thread_privileges);
            })
            .await;
        });
        panic!("runtime worker survived a restoration failure");
    }

    let output = Command::new(std::env::current_exe().unwrap())
        .args([
            "--exact",
            "test_restoration_failure_aborts_runtime_worker",
            "--ignored",
            "--test-threads=1",
        ])
        .env(PLAIN_THREAD_CHILD, "1")
        .output()
        .unwrap();
    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
}

#[test]
#[ignore] // Requires root
fn test_mount_worker_picks_up_caller_namespaces() {
    let mnt = new_transient(NamespaceType::Mount).unwrap();
    let (caller_net, worker_net) = worker::run_scoped("test-pickup", || {
        let _guard = enter_transient(NamespaceType::Net).unwrap();
        let caller_net = current_ino(NamespaceType::Net).unwrap();
        let worker_net = execute(&[&mnt], || current_ino(NamespaceType::Net).unwrap()).unwrap();
        (caller_net, worker_net)
    })
    .unwrap();

    assert_ne!(caller_net, current_ino(NamespaceType::Net).unwrap());
    assert_eq!(worker_net, caller_net);
}

#[tokio::test]
#[ignore] // Requires root
async fn test_new_rooms_all_flat_types() {
    let spaces = NamespaceSet::of(NamespaceType::FLAT);
    let rooms = new_rooms(spaces).await.unwrap();
    assert_eq!(rooms.spaces(), spaces);
    for (typ, handle) in rooms.iter() {
        assert_eq!(handle.kind().unwrap(), typ);
    }
}
