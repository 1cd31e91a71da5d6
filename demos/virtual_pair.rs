//! Create a virtual serial pair and push a message across it
//!
//! Usage:
//!   cargo run --example virtual_pair

use serinet::SerialPair;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut pair = SerialPair::new();
    pair.start()?;

    let first = pair
        .first()
        .ok_or_else(|| anyhow::anyhow!("pair has no first endpoint"))?
        .to_string();
    let second = pair
        .second()
        .ok_or_else(|| anyhow::anyhow!("pair has no second endpoint"))?
        .to_string();
    println!("pair: {first} <-> {second}");

    let mut tx = OpenOptions::new().read(true).write(true).open(&first)?;
    let mut rx = OpenOptions::new().read(true).write(true).open(&second)?;

    tx.write_all(b"hello across the pair\n")?;
    std::thread::sleep(Duration::from_millis(200));

    let mut buf = [0u8; 64];
    let n = rx.read(&mut buf)?;
    println!("second endpoint read: {:?}", String::from_utf8_lossy(&buf[..n]));

    pair.stop();
    Ok(())
}
