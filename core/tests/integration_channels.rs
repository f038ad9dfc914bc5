// Integration test: byte channels and the connection registry
//
// Verifies that:
// - bytes buffered before a reader exists reach it in order, exactly once
// - concurrent producers never reorder one producer's bytes
// - close is idempotent and the disconnect listener fires once
// - the registry routes driver events to the right channel

use futures::StreamExt;
use nearcast_core::config::ChannelConfig;
use nearcast_core::connection::{ByteChannel, ConnectionRegistry};
use nearcast_core::platform::{ConnectionEvent, LoopbackRadio};
use nearcast_core::NearbyError;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn channel(radio: &Arc<LoopbackRadio>, peer: &str) -> ByteChannel {
    ByteChannel::new(peer, radio.clone(), ChannelConfig::default())
}

fn collector() -> (Arc<Mutex<Vec<Vec<u8>>>>, Arc<dyn Fn(Vec<u8>) + Send + Sync>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, Arc::new(move |bytes: Vec<u8>| sink.lock().push(bytes)))
}

proptest! {
    #[test]
    fn prop_buffered_bytes_delivered_in_order(
        chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..32), 0..64)
    ) {
        let radio = Arc::new(LoopbackRadio::new());
        let channel = channel(&radio, "peer");
        for chunk in &chunks {
            channel.enqueue_inbound(chunk.clone());
        }

        let (seen, callback) = collector();
        channel.register_read_callback(callback).expect("register");

        prop_assert_eq!(&*seen.lock(), &chunks);
        prop_assert_eq!(channel.pending(), 0);
    }
}

#[test]
fn test_concurrent_producers_keep_per_producer_order() {
    let radio = Arc::new(LoopbackRadio::new());
    let channel = Arc::new(channel(&radio, "peer"));
    let (seen, callback) = collector();
    channel.register_read_callback(callback).expect("register");

    let producers: Vec<_> = (0u8..4)
        .map(|producer| {
            let channel = channel.clone();
            thread::spawn(move || {
                for seq in 0u8..100 {
                    channel.enqueue_inbound(vec![producer, seq]);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), 400);
    for producer in 0u8..4 {
        let sequence: Vec<u8> = seen
            .iter()
            .filter(|bytes| bytes[0] == producer)
            .map(|bytes| bytes[1])
            .collect();
        assert_eq!(sequence, (0u8..100).collect::<Vec<_>>());
    }
    println!("✓ 400 buffers from 4 producers delivered in per-producer order");
}

#[test]
fn test_close_is_idempotent() {
    let radio = Arc::new(LoopbackRadio::new());
    let channel = channel(&radio, "peer");
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    channel.set_disconnect_listener(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    for _ in 0..5 {
        channel.close();
    }

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(radio.disconnected(), vec!["peer".to_string()]);
    assert_eq!(channel.write(b"late"), Err(NearbyError::Closed));
    println!("✓ Five closes, one listener call, one driver disconnect");
}

#[test]
fn test_blocking_read_wakes_on_inbound() {
    let radio = Arc::new(LoopbackRadio::new());
    let channel = Arc::new(channel(&radio, "peer"));

    let producer = {
        let channel = channel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            channel.enqueue_inbound(b"hello".to_vec());
        })
    };

    let read = channel
        .read_timeout(Duration::from_secs(5))
        .expect("read");
    assert_eq!(read.as_deref(), Some(&b"hello"[..]));
    producer.join().expect("producer");
}

#[test]
fn test_echo_round_trip_through_registry() {
    let radio = Arc::new(LoopbackRadio::new());
    radio.set_echo(true);
    let registry = ConnectionRegistry::new(radio.clone(), ChannelConfig::default());
    let mut events = radio.connection_events();

    let channel = registry.open("peer-1");
    let (seen, callback) = collector();
    channel.register_read_callback(callback).expect("register");
    channel.write(b"ping").expect("write");

    let event = futures::executor::block_on(events.next()).expect("event");
    registry.handle_event(event);

    assert_eq!(*seen.lock(), vec![b"ping".to_vec()]);
    assert_eq!(radio.sent(), vec![("peer-1".to_string(), b"ping".to_vec())]);
}

#[tokio::test]
async fn test_registry_consumes_event_stream() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();

    let radio = Arc::new(LoopbackRadio::new());
    let registry = ConnectionRegistry::new(radio.clone(), ChannelConfig::default());
    let events = radio.connection_events();

    let alice = registry.open("alice");
    let bob = registry.open("bob");
    let (alice_seen, alice_reader) = collector();
    alice.register_read_callback(alice_reader).expect("register");

    radio.deliver_bytes("alice", b"one".to_vec());
    radio.deliver_bytes("bob", b"two".to_vec());
    radio.deliver_bytes("nobody", b"dropped".to_vec());
    radio.drop_endpoint("bob");

    registry.run(events.take(4)).await;

    assert_eq!(*alice_seen.lock(), vec![b"one".to_vec()]);
    assert!(bob.is_closed());
    assert_eq!(registry.endpoints(), vec!["alice".to_string()]);
    // a remote disconnect does not echo back to the driver
    assert!(radio.disconnected().is_empty());
    println!("✓ Registry routed 4 driver events");
}

#[test]
fn test_registry_ignores_unknown_disconnect() {
    let radio = Arc::new(LoopbackRadio::new());
    let registry = ConnectionRegistry::new(radio.clone(), ChannelConfig::default());
    registry.handle_event(ConnectionEvent::Disconnected {
        endpoint_id: "ghost".to_string(),
    });
    assert!(registry.is_empty());
}
