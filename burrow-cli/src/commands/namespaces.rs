//! Namespaces command implementation

use anyhow::Result;
use burrow_core::{NamespaceHandle, NamespaceType};

pub fn execute(pid: Option<i32>) -> Result<()> {
    #[allow(clippy::cast_possible_wrap)]
    let target_pid = pid.unwrap_or_else(|| std::process::id() as i32);

    println!("Namespaces of PID {target_pid}");
    for typ in NamespaceType::ALL {
        match NamespaceHandle::of_process(target_pid, typ).and_then(|handle| handle.ino()) {
            Ok(ino) => println!("{typ:<8}{ino}"),
            Err(e) => println!("{typ:<8}unavailable ({e})"),
        }
    }
    Ok(())
}
