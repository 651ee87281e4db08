//! Rooms command implementation

use anyhow::{Context, Result};
use burrow_broker::{BrokerConfig, BrokerSession, Shutdown};
use burrow_core::{NamespaceSet, NamespaceType};

pub async fn execute(types: &[NamespaceType]) -> Result<()> {
    let spaces = NamespaceSet::of(types.iter().copied());

    let mut session = BrokerSession::start(BrokerConfig::default(), Shutdown::never())
        .context("Failed to start broker")?;
    let rooms = session
        .rooms(spaces)
        .await
        .with_context(|| format!("Failed to create {spaces} namespaces"))?;

    for (typ, handle) in rooms.iter() {
        let ino = handle
            .ino()
            .with_context(|| format!("Failed to identify new {typ} namespace"))?;
        println!("{typ:<8}{ino}");
    }
    Ok(())
}
