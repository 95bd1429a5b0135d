//! Per-channel pacing with the manager: each multicast group gets its
//! own bucket built from one configuration template.

use pacer::{ChannelPacerManager, PacerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    println!("=== Per-Channel Pacing Example ===\n");

    let config = PacerConfig::new(5_000, 28, 1500);
    let manager = Arc::new(ChannelPacerManager::with_cleanup_settings(
        config, 500,  // sweep every 500ms
        2_000, // reap channels idle for 2s
    ));

    let groups: Vec<SocketAddr> = vec![
        "239.192.0.1:7500".parse().unwrap(),
        "239.192.0.2:7500".parse().unwrap(),
        "239.192.0.3:7500".parse().unwrap(),
    ];

    // Each channel drains its own bucket independently
    for group in &groups {
        let mut admitted = 0;
        while manager.check(*group, 1400, true) {
            admitted += 1;
        }
        println!("channel {}: {} packets before the bucket ran dry", group, admitted);
    }

    println!("\n{}", manager.stats());

    // Background sweep reaps channels once they go quiet
    let (handle, shutdown) = manager.clone().start_cleanup_thread_with_shutdown();
    println!("\nwaiting for the idle sweep...");
    thread::sleep(Duration::from_secs(3));
    println!("{}", manager.stats());

    shutdown.send(()).ok();
    handle.join().unwrap();
}
