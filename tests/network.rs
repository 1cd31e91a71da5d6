//! End-to-end tests over real pseudo-terminal pairs
//!
//! Every test brings up a network, talks to its endpoints through their
//! slave paths like an ordinary serial consumer would, and tears it down.

#![cfg(unix)]

use serinet::{DataLogConfig, NetworkConfig, SerialNetwork, SerialPair, SerialPortConfig};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(2);

fn open_port(path: &str) -> File {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("open endpoint");
    set_nonblocking(&file);
    file
}

fn set_nonblocking(file: &File) {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL).expect("F_GETFL");
    fcntl(
        file.as_raw_fd(),
        FcntlArg::F_SETFL(OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK),
    )
    .expect("F_SETFL");
}

/// Collect bytes until `expected_len` arrived or the deadline passed.
fn read_until(file: &mut File, expected_len: usize, deadline: Duration) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    let start = Instant::now();
    while collected.len() < expected_len && start.elapsed() < deadline {
        match file.read(&mut buf) {
            Ok(n) if n > 0 => collected.extend_from_slice(&buf[..n]),
            Ok(_) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    collected
}

/// Assert nothing arrives on `file` within the window.
fn assert_no_data(file: &mut File, window: Duration) {
    let mut buf = [0u8; 64];
    let start = Instant::now();
    while start.elapsed() < window {
        match file.read(&mut buf) {
            Ok(n) if n > 0 => panic!("unexpected {n} byte(s)"),
            _ => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}

#[test]
fn test_fresh_network_relays_between_two_ports() {
    let mut network = SerialNetwork::new(NetworkConfig::new(0));
    network.start().expect("start");

    let created = network.create(2).expect("create");
    assert_eq!(created.len(), 2);
    assert_ne!(created[0], created[1]);

    let mut tx = open_port(&created[0]);
    let mut rx = open_port(&created[1]);
    tx.write_all(b"Hello, World!").expect("write");
    assert_eq!(read_until(&mut rx, 13, DEADLINE), b"Hello, World!");

    network.stop();
}

#[test]
fn test_create_yields_distinct_identifiers() {
    let mut network = SerialNetwork::new(NetworkConfig::new(0));
    network.start().expect("start");

    let mut created = network.create(4).expect("create");
    assert_eq!(created.len(), 4);
    assert_eq!(network.ports().len(), 4);
    created.sort();
    created.dedup();
    assert_eq!(created.len(), 4);

    network.stop();
}

#[test]
fn test_broadcast_reaches_every_other_endpoint_but_not_the_source() {
    let mut network = SerialNetwork::new(NetworkConfig::new(3));
    network.start().expect("start");
    let ports = network.ports().to_vec();
    assert_eq!(ports.len(), 3);

    let mut a = open_port(&ports[0]);
    let mut b = open_port(&ports[1]);
    let mut c = open_port(&ports[2]);

    a.write_all(b"broadcast").expect("write");
    assert_eq!(read_until(&mut b, 9, DEADLINE), b"broadcast");
    assert_eq!(read_until(&mut c, 9, DEADLINE), b"broadcast");
    assert_no_data(&mut a, Duration::from_millis(300));

    network.stop();
}

#[test]
fn test_loopback_returns_bytes_to_the_source() {
    let mut network = SerialNetwork::new(NetworkConfig::new(2).loopback(true));
    network.start().expect("start");
    let ports = network.ports().to_vec();

    let mut a = open_port(&ports[0]);
    let mut b = open_port(&ports[1]);

    a.write_all(b"ping").expect("write");
    assert_eq!(read_until(&mut b, 4, DEADLINE), b"ping");
    assert_eq!(read_until(&mut a, 4, DEADLINE), b"ping");

    network.stop();
}

#[test]
fn test_adding_a_tracked_identifier_is_a_local_no_op() {
    let mut network = SerialNetwork::new(NetworkConfig::new(2));
    network.start().expect("start");
    let existing = network.ports()[0].clone();
    let before = network.ports().len();

    network
        .add(&[SerialPortConfig::new(&existing, 115_200)])
        .expect("add");

    assert_eq!(network.ports().len(), before);
    assert!(network.external_ports().is_empty());

    network.stop();
}

#[test]
fn test_removing_an_unknown_identifier_leaves_state_unchanged() {
    let mut network = SerialNetwork::new(NetworkConfig::new(2));
    network.start().expect("start");
    let before = network.ports().to_vec();

    network
        .remove(&["/dev/nonexistent".to_string()])
        .expect("remove");

    assert_eq!(network.ports(), before.as_slice());
    network.stop();
}

#[test]
fn test_remove_is_idempotent_on_the_local_view() {
    let mut network = SerialNetwork::new(NetworkConfig::new(2));
    network.start().expect("start");
    let target = network.ports()[0].clone();

    network.remove(&[target.clone()]).expect("remove");
    assert_eq!(network.ports().len(), 1);
    assert!(!network.ports().contains(&target));

    network.remove(&[target]).expect("remove");
    assert_eq!(network.ports().len(), 1);

    network.stop();
}

#[test]
fn test_adding_an_absent_device_is_logged_not_raised() {
    let mut network = SerialNetwork::new(NetworkConfig::new(1));
    network.start().expect("start");
    let before = network.ports().to_vec();

    network
        .add(&[SerialPortConfig::new("/dev/definitely-absent-xyz", 9600)])
        .expect("add");

    assert_eq!(network.ports(), before.as_slice());
    assert!(network.external_ports().is_empty());
    network.stop();
}

#[test]
fn test_delimited_data_logging_emits_one_record_per_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("vsn-data.log");
    let mut network = SerialNetwork::new(
        NetworkConfig::new(2).data_log(DataLogConfig::new(&log_path).delimiter(b"\n")),
    );
    network.start().expect("start");
    let ports = network.ports().to_vec();

    let mut tx = open_port(&ports[0]);
    let mut rx = open_port(&ports[1]);
    tx.write_all(b"ab\ncd\n").expect("write");

    // once the peer saw all six bytes the worker has consumed the chunk
    assert_eq!(read_until(&mut rx, 6, DEADLINE), b"ab\ncd\n");
    std::thread::sleep(Duration::from_millis(200));
    network.stop();

    let contents = std::fs::read_to_string(&log_path).expect("read log");
    let records: Vec<&str> = contents.lines().collect();
    assert_eq!(records.len(), 2, "log was: {contents}");
    assert!(records[0].contains(&ports[0]));
    assert!(records[0].contains("6162"));
    assert!(records[0].contains("\"ab\""));
    assert!(records[1].contains("6364"));
    assert!(records[1].contains("\"cd\""));
}

#[test]
fn test_topology_mutation_does_not_disturb_unrelated_endpoints() {
    let mut network = SerialNetwork::new(NetworkConfig::new(2));
    network.start().expect("start");
    let ports = network.ports().to_vec();

    let mut tx = open_port(&ports[0]);
    let mut rx = open_port(&ports[1]);

    let writer = std::thread::spawn(move || {
        for _ in 0..20 {
            tx.write_all(b"tick").expect("write");
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    // mutate the topology while traffic is flowing
    let grown = network.create(1).expect("create");
    assert_eq!(grown.len(), 1);
    network.remove(&grown).expect("remove");

    writer.join().expect("writer");
    let got = read_until(&mut rx, 80, Duration::from_secs(4));
    assert_eq!(got.len(), 80);
    assert!(got.chunks(4).all(|chunk| chunk == b"tick"));

    network.stop();
}

#[test]
fn test_stop_clears_the_local_view_and_allows_restart() {
    let mut network = SerialNetwork::new(NetworkConfig::new(2));
    network.start().expect("start");
    assert_eq!(network.ports().len(), 2);
    assert!(network.is_running());

    network.stop();
    assert!(network.ports().is_empty());
    assert!(!network.is_running());

    network.start().expect("restart");
    assert_eq!(network.ports().len(), 2);
    network.stop();
}

#[test]
fn test_start_twice_is_rejected() {
    let mut network = SerialNetwork::new(NetworkConfig::new(1));
    network.start().expect("start");
    assert!(network.start().is_err());
    network.stop();
}

#[test]
fn test_pair_mirrors_both_directions() {
    let mut pair = SerialPair::new();
    pair.start().expect("start");
    let first = pair.first().expect("first").to_string();
    let second = pair.second().expect("second").to_string();

    let mut a = open_port(&first);
    let mut b = open_port(&second);

    a.write_all(b"forward").expect("write");
    assert_eq!(read_until(&mut b, 7, DEADLINE), b"forward");

    b.write_all(b"reverse").expect("write");
    assert_eq!(read_until(&mut a, 7, DEADLINE), b"reverse");

    pair.stop();
}
