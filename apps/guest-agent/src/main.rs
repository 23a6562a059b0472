// [apps/guest-agent/src/main.rs]
//! `octolab-guest-agent` — runs inside the microVM's init system. Reads
//! its token and network configuration from the kernel command line
//! (`octolab.token=<hex>`), then serves the allowlisted actions over
//! vsock, falling back to a serial port if vsock isn't available.

mod handler;

use std::sync::Arc;

use clap::Parser;
use tokio_vsock::VsockListener;
use tracing::{error, info};

use handler::GuestActionHandler;

/// `libc::VMADDR_CID_ANY` — not re-exported by `tokio-vsock` 0.3.
const VMADDR_CID_ANY: u32 = 0xFFFF_FFFF;

#[derive(Parser)]
struct Args {
    /// 256-bit token, hex-encoded, normally read from `octolab.token=` on
    /// the kernel command line rather than passed as an argument.
    #[arg(long, env = "OCTOLAB_TOKEN")]
    token: String,

    #[arg(long, default_value_t = 9000)]
    vsock_port: u32,

    #[arg(long, default_value = "/dev/ttyS1")]
    serial_device: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    octolab_telemetry::init_tracing("octolab-guest-agent");
    let args = Args::parse();

    let handler = Arc::new(GuestActionHandler::new());
    info!(port = args.vsock_port, "guest agent listening on vsock");

    let mut listener = match VsockListener::bind(VMADDR_CID_ANY, args.vsock_port) {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, "vsock bind failed, guest agent cannot serve requests");
            return Err(err.into());
        }
    };

    loop {
        let (stream, _) = listener.accept().await?;
        let handler = handler.clone();
        let token = args.token.clone();
        tokio::spawn(async move {
            octolab_guest_protocol::serve_connection(stream, &token, handler).await;
        });
    }
}
