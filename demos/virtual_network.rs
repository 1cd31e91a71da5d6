//! Walk-through of two serial networks sharing an endpoint
//!
//! Mirrors the common lab setup: one network simulates a bus of devices,
//! a second network taps into it through one shared port.
//!
//! Usage:
//!   cargo run --example virtual_network

use serinet::{NetworkConfig, SerialNetwork, SerialPortConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut first = SerialNetwork::new(NetworkConfig::new(3));
    first.start()?;
    println!("first network ports: {:?}", first.ports());

    let mut second = SerialNetwork::new(NetworkConfig::new(2));
    second.start()?;

    // Bridge the two networks through one shared endpoint.
    let shared = first
        .ports()
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("first network came up without endpoints"))?;
    second.add(&[SerialPortConfig::new(&shared, 115_200)])?;

    // Grow the first network while both are live.
    first.create(2)?;

    println!("first network ports: {:?}", first.ports());
    println!("second network ports: {:?}", second.ports());
    println!("second network external ports: {:?}", second.external_ports());

    first.stop();
    second.stop();
    Ok(())
}
