//! End-to-end transfers over loopback.
//!
//! Each test binds two real sockets, runs the receiver in a background task
//! and the sender in the test task, optionally with a fault-injecting
//! [`Simulator`] on either side.

use std::net::SocketAddr;
use std::time::Duration;

use udp_transfer::digest::digest;
use udp_transfer::packet::PacketKind;
use udp_transfer::receiver::ReceivedFile;
use udp_transfer::sender::SendReport;
use udp_transfer::simulator::{FaultScope, Simulator, SimulatorConfig};
use udp_transfer::socket::{Socket, Transport};
use udp_transfer::{receive_file, send_file, Outgoing, TransferConfig, TransferError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind failed")
}

/// Short timers so lossy runs finish quickly.
fn fast_config(capacity: usize, window: usize) -> TransferConfig {
    TransferConfig {
        payload_capacity: capacity,
        window_size: window,
        base_timeout: Duration::from_millis(50),
        retransmit_timeout: Duration::from_millis(60),
        max_attempts: 6,
        max_retransmits: 60,
        idle_timeout: Duration::from_secs(5),
        linger: Duration::from_millis(150),
    }
}

/// Run one transfer to completion on both ends.
async fn transfer<S, R>(
    sender: S,
    receiver: R,
    file: Outgoing,
    config: TransferConfig,
) -> (
    Result<SendReport, TransferError>,
    Result<ReceivedFile, TransferError>,
)
where
    S: Transport,
    R: Transport + 'static,
{
    let receiver_addr: SocketAddr = receiver.local_addr().unwrap();
    let receiver_config = config.clone();
    let receiving =
        tokio::spawn(async move { receive_file(&receiver, None, &receiver_config).await });

    let sent = tokio::time::timeout(
        Duration::from_secs(30),
        send_file(&sender, receiver_addr, &file, &config),
    )
    .await
    .expect("sender timed out");
    let received = tokio::time::timeout(Duration::from_secs(30), receiving)
        .await
        .expect("receiver timed out")
        .expect("receiver task panicked");
    (sent, received)
}

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

// ---------------------------------------------------------------------------
// Lossless
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ten_bytes_in_three_packets() {
    let file = Outgoing::new("letters.txt", b"ABCDEFGHIJ".to_vec());
    let (sent, received) =
        transfer(ephemeral().await, ephemeral().await, file, fast_config(4, 2)).await;

    let sent = sent.expect("send failed");
    let received = received.expect("receive failed");
    assert_eq!(sent.data_packets, 3);
    assert_eq!(sent.bytes, 10);
    assert_eq!(received.report.data_packets, 3);
    assert_eq!(received.name, "letters.txt");
    assert_eq!(received.data, b"ABCDEFGHIJ");
    assert_eq!(received.digest, digest(b"ABCDEFGHIJ"));
}

#[tokio::test]
async fn long_name_and_five_digit_length_at_capacity_four() {
    // Name and length both span several control packets.
    let name = "a-rather-long-file-name.bin";
    let data = random_bytes(12_345);
    let file = Outgoing::new(name, data.clone());
    let (sent, received) =
        transfer(ephemeral().await, ephemeral().await, file, fast_config(4, 8)).await;

    let sent = sent.expect("send failed");
    assert_eq!(sent.data_packets, 3087);
    // 8 NAME + 3 SIZE + 32 HASH + START + STOP.
    assert!(sent.control_transmissions >= 45);
    let received = received.expect("receive failed");
    assert_eq!(received.name, name);
    assert_eq!(received.report.data_packets, 3087);
    assert_eq!(received.data, data);
}

#[tokio::test]
async fn empty_file_sends_no_data() {
    let file = Outgoing::new("empty", Vec::new());
    let (sent, received) =
        transfer(ephemeral().await, ephemeral().await, file, fast_config(16, 4)).await;

    assert_eq!(sent.unwrap().data_packets, 0);
    let received = received.unwrap();
    assert!(received.data.is_empty());
    assert_eq!(received.report.data_packets, 0);
}

#[tokio::test]
async fn exact_multiple_of_capacity() {
    let data = random_bytes(64 * 5);
    let file = Outgoing::new("blocks.bin", data.clone());
    let (sent, received) =
        transfer(ephemeral().await, ephemeral().await, file, fast_config(64, 3)).await;

    assert_eq!(sent.unwrap().data_packets, 5);
    assert_eq!(received.unwrap().data, data);
}

#[tokio::test]
async fn window_of_one_is_stop_and_wait() {
    let data = random_bytes(500);
    let file = Outgoing::new("saw.bin", data.clone());
    let (sent, received) =
        transfer(ephemeral().await, ephemeral().await, file, fast_config(32, 1)).await;

    sent.unwrap();
    assert_eq!(received.unwrap().data, data);
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn survives_window_minus_one_consecutive_drops() {
    let capacity = 16;
    let window = 4;
    let drops = (0..window as u32 - 1)
        .map(|seq| (PacketKind::Data, seq * capacity as u32))
        .collect();
    let sender = Simulator::new(
        ephemeral().await,
        SimulatorConfig {
            drop_once: drops,
            ..SimulatorConfig::default()
        },
    )
    .unwrap();

    let data = random_bytes(capacity * 10 + 3);
    let file = Outgoing::new("drops.bin", data.clone());
    let (sent, received) =
        transfer(sender, ephemeral().await, file, fast_config(capacity, window)).await;

    assert!(sent.unwrap().retransmissions >= 3);
    assert_eq!(received.unwrap().data, data);
}

#[tokio::test]
async fn corrupt_data_is_never_written() {
    let capacity = 8;
    let sender = Simulator::new(
        ephemeral().await,
        SimulatorConfig {
            corrupt_once: vec![(PacketKind::Data, capacity as u32)],
            ..SimulatorConfig::default()
        },
    )
    .unwrap();

    let data = b"the quick brown fox jumps over the lazy dog".to_vec();
    let file = Outgoing::new("fox.txt", data.clone());
    let (sent, received) =
        transfer(sender, ephemeral().await, file, fast_config(capacity, 3)).await;

    sent.unwrap();
    let received = received.unwrap();
    assert_eq!(received.report.corrupt_frames, 1);
    assert_eq!(received.data, data);
}

#[tokio::test]
async fn corrupt_control_frame_is_nacked_and_resent() {
    let sender = Simulator::new(
        ephemeral().await,
        SimulatorConfig {
            corrupt_once: vec![(PacketKind::Name, 0)],
            ..SimulatorConfig::default()
        },
    )
    .unwrap();

    let file = Outgoing::new("name.txt", b"payload".to_vec());
    let (sent, received) = transfer(sender, ephemeral().await, file, fast_config(16, 2)).await;

    let sent = sent.unwrap();
    assert!(sent.control_transmissions > 36);
    let received = received.unwrap();
    assert_eq!(received.name, "name.txt");
    assert_eq!(received.report.corrupt_frames, 1);
}

#[tokio::test]
async fn random_faults_on_both_directions() {
    let faults = |seed| SimulatorConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.1,
        corrupt_rate: 0.05,
        reorder_rate: 0.1,
        scope: FaultScope::DataPath,
        seed,
        ..SimulatorConfig::default()
    };
    let sender = Simulator::new(ephemeral().await, faults(7)).unwrap();
    let receiver = Simulator::new(ephemeral().await, faults(11)).unwrap();

    let data = random_bytes(20_000);
    let file = Outgoing::new("noisy.bin", data.clone());
    let (sent, received) = transfer(sender, receiver, file, fast_config(256, 8)).await;

    sent.expect("send failed");
    let received = received.expect("receive failed");
    assert_eq!(received.data, data);
    assert_eq!(received.report.data_packets, 79);
}

#[tokio::test]
async fn lost_final_stop_ack_is_answered_while_lingering() {
    let receiver = Simulator::new(
        ephemeral().await,
        SimulatorConfig {
            // ACK of the STOP for 1 data packet: 2 + 32 + 1 + 1.
            drop_once: vec![(PacketKind::Ack, 36)],
            ..SimulatorConfig::default()
        },
    )
    .unwrap();

    let file = Outgoing::new("one.bin", b"abc".to_vec());
    let (sent, received) = transfer(ephemeral().await, receiver, file, fast_config(16, 2)).await;

    sent.expect("sender should get the re-sent STOP ACK");
    assert_eq!(received.unwrap().data, b"abc");
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wrong_digest_is_rejected() {
    let mut file = Outgoing::new("tampered.bin", b"ABCDEFGHIJ".to_vec());
    file.digest[0] ^= 0xff;

    let (sent, received) =
        transfer(ephemeral().await, ephemeral().await, file, fast_config(4, 2)).await;

    sent.expect("sender completes; only the receiver can tell");
    let err = received.unwrap_err();
    assert!(matches!(err, TransferError::DigestMismatch { .. }));
    assert_eq!(err.exit_code(), 32);
}
