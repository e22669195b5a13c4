use snapsync_network::protocol::{Message, MessageStats};
use std::time::Duration;

#[test]
fn counters_track_payload_bytes() {
    let mut stats = MessageStats::default();
    stats.record_sent(&Message::Heartbeat {
        patch: vec![0; 10],
        checksum: "0123456789abcdef".to_string(),
    });
    stats.record_received(&Message::Ack { checksum: 1 });

    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.bytes_sent, 26);
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.bytes_received, 0);
}

#[test]
fn update_rtt_records_elapsed_micros() {
    let mut stats = MessageStats::default();
    assert!(stats.last_rtt_micros.is_none());
    stats.update_rtt(Duration::from_millis(10));
    assert_eq!(stats.last_rtt_micros, Some(10_000));
}
