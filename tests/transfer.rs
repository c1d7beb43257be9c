//! End-to-end transfer tests.
//!
//! Each test runs both endpoints as tokio tasks over the loopback interface
//! and asserts byte-exact delivery, the close sequence, and the sender's
//! statistics, with and without an impaired link.

use rand::Rng;

use rudp::link::LinkConfig;
use rudp::packet::MAX_PAYLOAD;
use rudp::receiver::run_receiver;
use rudp::sender::run_sender;
use rudp::socket::Socket;
use rudp::stats::TransferStats;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..n).map(|_| rng.random::<u8>()).collect()
}

/// Run one complete flow over loopback and return `(received, stats)`.
async fn transfer(input: Vec<u8>, window: u16, link: Option<LinkConfig>) -> (Vec<u8>, TransferStats) {
    let server_sock = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let server_addr = server_sock.local_addr;

    let receiver = tokio::spawn(async move {
        let mut sink: Vec<u8> = Vec::new();
        run_receiver(server_sock, &mut sink, window)
            .await
            .expect("receiver failed");
        sink
    });

    let sender = tokio::spawn(async move {
        let mut socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        if let Some(link) = link {
            socket.set_link(link);
        }
        let mut source = input.as_slice();
        run_sender(socket, server_addr, &mut source)
            .await
            .expect("sender failed")
    });

    let (received, stats) = tokio::join!(receiver, sender);
    (received.unwrap(), stats.unwrap())
}

// ---------------------------------------------------------------------------
// Clean link
// ---------------------------------------------------------------------------

/// 4096 random bytes over a clean link: byte-exact, five segments (four full
/// plus one of 96 bytes), no retransmission.
#[tokio::test]
async fn lossless_small_file() {
    let input = random_bytes(4096);
    let (received, stats) = transfer(input.clone(), 64, None).await;

    assert_eq!(received, input);
    assert_eq!(stats.packets_sent, 5);
    assert_eq!(stats.retransmissions, 0);
    assert_eq!(stats.bytes_delivered, 4096);
    assert_eq!(stats.recv_window, 64);
}

/// An empty input still handshakes and closes; the output is created empty
/// and no DATA packet is ever sent.
#[tokio::test]
async fn empty_file() {
    let (received, stats) = transfer(Vec::new(), 64, None).await;

    assert!(received.is_empty());
    assert_eq!(stats.packets_sent, 0);
    assert_eq!(stats.bytes_delivered, 0);
}

/// A single byte travels as one DATA packet and closes cleanly.
#[tokio::test]
async fn single_byte_file() {
    let (received, stats) = transfer(vec![0x5A], 64, None).await;

    assert_eq!(received, vec![0x5A]);
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.bytes_delivered, 1);
}

/// A multi-window transfer larger than the congestion cap still arrives
/// byte-exact.
#[tokio::test]
async fn lossless_multi_window_file() {
    let input = random_bytes(MAX_PAYLOAD * 150 + 17);
    let (received, stats) = transfer(input.clone(), 64, None).await;

    assert_eq!(received, input);
    assert_eq!(stats.bytes_delivered, input.len() as u64);
}

/// A receive window of one degenerates to stop-and-wait but still delivers.
#[tokio::test]
async fn window_of_one_is_stop_and_wait() {
    let input = random_bytes(MAX_PAYLOAD * 5);
    let (received, stats) = transfer(input.clone(), 1, None).await;

    assert_eq!(received, input);
    assert_eq!(stats.recv_window, 1);
}

// ---------------------------------------------------------------------------
// Impaired link
// ---------------------------------------------------------------------------

/// 30% forward-path loss: the flow still completes byte-exact and the loss
/// shows up as retransmissions.
#[tokio::test]
async fn delivery_under_loss() {
    let input = random_bytes(MAX_PAYLOAD * 100);
    let (received, stats) = transfer(input.clone(), 64, Some(LinkConfig::new(0, 30.0))).await;

    assert_eq!(received, input);
    assert!(
        stats.retransmissions >= 1,
        "loss must surface as retransmissions"
    );
}

/// Loss combined with an emulated one-way delay: byte-exact delivery, and
/// the RTT samples reflect the delay.
#[tokio::test]
async fn delivery_under_delay_and_loss() {
    let input = random_bytes(MAX_PAYLOAD * 30);
    let (received, stats) = transfer(input.clone(), 64, Some(LinkConfig::new(5, 10.0))).await;

    assert_eq!(received, input);
    assert!(stats.retransmissions >= 1 || stats.packets_sent == 30);
    assert!(
        stats.avg_rtt_us() >= 4_000.0,
        "RTT must cover the emulated delay, got {} us",
        stats.avg_rtt_us()
    );
}
