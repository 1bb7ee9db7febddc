//! Discovers fireplaces on the local network and prints their state as it
//! changes, until interrupted.
//!
//! ```bash
//! cargo run --example monitor -- --broadcast 255.255.255.255
//! ```

use std::sync::Arc;

use clap::Parser;
use escea::config::Config;
use escea::controller::{Controller, DisconnectCause};
use escea::discovery::{DiscoveryService, Listener};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Broadcast address to probe.
    #[arg(long, default_value = "255.255.255.255")]
    broadcast: std::net::IpAddr,
}

struct PrintingListener;

impl Listener for PrintingListener {
    fn controller_discovered(&self, controller: Arc<Controller>) {
        println!("discovered {}", controller.serial_number());
    }

    fn controller_disconnected(&self, controller: Arc<Controller>, cause: DisconnectCause) {
        println!("{} disconnected ({:?})", controller.serial_number(), cause);
    }

    fn controller_reconnected(&self, controller: Arc<Controller>) {
        println!("{} reconnected", controller.serial_number());
    }

    fn controller_update(&self, controller: Arc<Controller>) {
        println!("{} updated", controller.serial_number());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let service = DiscoveryService::with_broadcast_addr(Config::default(), args.broadcast);
    service.add_listener(Arc::new(PrintingListener)).await;
    service.start_discovery().await?;

    signal::ctrl_c().await?;
    println!("shutting down");
    service.close().await;

    Ok(())
}
