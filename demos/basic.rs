//! Basic usage example for the pacer crate.

use pacer::{Pacer, PacerBuilder};
use std::time::{Duration, Instant};

fn main() {
    println!("=== Basic Pacer Example ===\n");

    nonblocking_example();

    println!("\n{}\n", "=".repeat(50));

    blocking_example();

    println!("\n{}\n", "=".repeat(50));

    metrics_example();
}

fn nonblocking_example() {
    println!("1. Non-blocking admission:");

    // 2 KB/s ceiling, no framing overhead, 100-byte packets
    let pacer = Pacer::new(2_000, 0, 100);
    println!("   Created pacer: 2000 B/s, bucket starts with 2000 bytes");

    let mut admitted = 0;
    let mut rejected = 0;

    for i in 1..=30 {
        if pacer.check(100, true) {
            admitted += 1;
            println!("   Packet {:2} (100 B) - admitted", i);
        } else {
            rejected += 1;
            let hint = pacer.remaining(100);
            println!("   Packet {:2} (100 B) - rejected, retry in ~{:?}", i, hint);
        }
    }

    println!("   Admitted: {}, rejected: {}", admitted, rejected);
}

fn blocking_example() {
    println!("2. Blocking admission paces the sender:");

    let pacer = PacerBuilder::new()
        .rate_bytes_per_sec(10_000)
        .header_overhead(28)
        .max_unit(1500)
        .build();

    println!("   Sending 10 x 1472 B payloads at a 10 KB/s ceiling...");

    let start = Instant::now();
    for i in 1..=10 {
        pacer.check(1472, false);
        println!("   Packet {:2} on the wire at t={:?}", i, start.elapsed());
    }

    let elapsed = start.elapsed();
    let sent_bytes = 10 * (1472 + 28);
    println!(
        "   {} bytes in {:?} (~{:.0} B/s)",
        sent_bytes,
        elapsed,
        sent_bytes as f64 / elapsed.as_secs_f64()
    );
}

fn metrics_example() {
    println!("3. Metrics:");

    let pacer = Pacer::new(5_000, 28, 1500);

    for _ in 0..8 {
        pacer.check(1400, true);
        std::thread::sleep(Duration::from_millis(50));
    }

    println!("{}", pacer.metrics().summary());
}
