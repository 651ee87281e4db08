//! Broker child entry point

use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use burrow_broker::{BrokerConfig, HandleChannel, Shutdown, Spacemaker, serve};
use nix::fcntl::{FcntlArg, fcntl};
use tracing::info;

pub async fn execute(fd: RawFd, receive_deadline: u64) -> Result<()> {
    if fd < 0 {
        bail!("no inherited channel at descriptor {fd}");
    }
    // SAFETY: borrowed only for querying the descriptor flags, which fails
    // with EBADF if nothing was inherited at that slot.
    let slot = unsafe { BorrowedFd::borrow_raw(fd) };
    if fcntl(slot, FcntlArg::F_GETFD).is_err() {
        bail!("no inherited channel at descriptor {fd}");
    }
    // SAFETY: the descriptor is open and was handed to this process for its
    // exclusive use.
    let inherited = unsafe { OwnedFd::from_raw_fd(fd) };
    let channel = HandleChannel::from_fd(inherited)
        .with_context(|| format!("Cannot serve on descriptor {fd}"))?;

    let config = BrokerConfig::new()
        .with_receive_deadline(Duration::from_secs(receive_deadline))
        .with_channel_slot(fd);
    let spacemaker = Spacemaker::new(config);

    info!(pid = std::process::id(), "Broker serving");
    let termination = serve(
        &channel,
        &spacemaker,
        &Shutdown::never(),
        spacemaker.config().receive_deadline,
    )
    .await;
    info!(?termination, "Broker done");
    Ok(())
}
