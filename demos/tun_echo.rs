//! Brings up a managed tun device on the reactor and logs every packet it
//! reads, echoing each one straight back out the same interface.
//!
//! ```bash
//! sudo tun-echo [config.toml]
//! ```
//!
//! Needs `CAP_NET_ADMIN` to create the device. With no config path, all
//! `os.*` settings take their spec defaults.

use std::cell::RefCell;
use std::rc::Rc;

use wheelnet::config::RuntimeConfigInput;
use wheelnet::runtime::Runtime;
use wheelnet::{BufferHandle, TunConfig, TunIface, TunIfaceOwner};
use wheelnet_core::time::Time;

struct EchoOwner {
    packets_seen: u64,
    self_handle: Option<Rc<RefCell<TunIface<EchoOwner>>>>,
}

impl TunIfaceOwner for EchoOwner {
    fn tun_packet_read(&mut self, packet: BufferHandle) {
        self.packets_seen += 1;
        tracing::info!(bytes = packet.len(), total = self.packets_seen, "packet read");

        let ip_version = packet.as_slice().first().map(|b| *b >> 4).unwrap_or(4);
        if let Some(iface) = &self.self_handle {
            if let Err(e) = iface.borrow_mut().send_packet(ip_version, packet) {
                tracing::warn!(error = %e, "echo write failed");
            }
        }
    }

    fn tun_closed(&mut self) {
        tracing::warn!("tun device closed");
    }

    fn tun_rate_update(&mut self, send_rate: u32, recv_rate: u32, _since: Time) {
        tracing::info!(send_rate, recv_rate, "tun rate update");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let config_path = std::env::args().nth(1);
    let config_toml = match &config_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };
    let runtime_config =
        RuntimeConfigInput::from_toml_str(&config_toml).map_err(|e| anyhow::anyhow!(e))?;

    let mut runtime = Runtime::new(runtime_config)?;
    tracing::info!("runtime assembled, bringing up tun device");

    let owner = Rc::new(RefCell::new(EchoOwner {
        packets_seen: 0,
        self_handle: None,
    }));

    let tun_config = TunConfig {
        rate_interval: 5,
        ..runtime.tun_config()
    };

    let iface = TunIface::start_managed(
        owner.clone(),
        &mut runtime.event_loop,
        runtime.packet_store.clone(),
        Some(1500),
        tun_config,
    )
    .map_err(|e| anyhow::anyhow!("failed to bring up tun device: {e}"))?;

    owner.borrow_mut().self_handle = Some(iface.clone());
    tracing::info!(iface = iface.borrow().iface_name(), "tun device up");

    let reason = runtime.event_loop.run();
    tracing::info!(?reason, "event loop stopped");

    Ok(())
}
