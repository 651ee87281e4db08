use crate::cli::Commands;
use anyhow::Result;

pub mod namespaces;
pub mod rooms;
pub mod serve;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            fd,
            receive_deadline,
        } => serve::execute(fd, receive_deadline).await,

        Commands::Rooms { types } => rooms::execute(&types).await,

        Commands::Namespaces { pid } => namespaces::execute(pid),

        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn print_version() {
    println!("burrow {}", env!("CARGO_PKG_VERSION"));
}
