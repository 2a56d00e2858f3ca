//! Round-trip benchmark: measure LIST command latency against a running
//! passwdd.
//!
//! Usage:
//!   # Terminal 1: start passwdd on an unprivileged port
//!   ./target/release/passwdd --port 10106 --alt-port 13659 \
//!       --private-key tests/fixtures/test_rsa.pem --database /tmp/users
//!
//!   # Terminal 2: run benchmark
//!   cargo bench --bench throughput
//!
//! The benchmark connects once, then times LIST round-trips and reports
//! mean and percentile latency.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

const WARMUP: usize = 100;
const ITERATIONS: usize = 5_000;

fn read_line(stream: &mut TcpStream, buf: &mut Vec<u8>) {
    let mut byte = [0u8; 1];
    buf.clear();
    loop {
        let n = stream.read(&mut byte).expect("read failed");
        if n == 0 {
            panic!("server closed connection");
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n") {
            return;
        }
    }
}

fn main() {
    let port: u16 = std::env::var("PASSWDD_BENCH_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10106);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream.set_nodelay(true).expect("set_nodelay failed");

    let mut buf = Vec::with_capacity(1024);
    read_line(&mut stream, &mut buf); // greeting

    // Warmup
    for _ in 0..WARMUP {
        stream.write_all(b"LIST\r\n").expect("write failed");
        read_line(&mut stream, &mut buf);
    }

    // Timed loop
    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        stream.write_all(b"LIST\r\n").expect("write failed");
        read_line(&mut stream, &mut buf);
        samples.push(start.elapsed());
    }

    samples.sort();
    let total: Duration = samples.iter().sum();
    let mean = total / ITERATIONS as u32;
    let p50 = samples[ITERATIONS / 2];
    let p99 = samples[ITERATIONS * 99 / 100];

    println!("LIST round-trips: {ITERATIONS}");
    println!("  mean: {mean:?}");
    println!("  p50:  {p50:?}");
    println!("  p99:  {p99:?}");

    stream.write_all(b"QUIT\r\n").expect("write failed");
    read_line(&mut stream, &mut buf);
}
