//! End-to-end relay tests: a real sender pipeline against a real receiver
//! fleet over loopback TCP.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chute_core::{BoundedQueue, MetricsWindow};
use chute_receiver::control::{handle_control_session, ControlState};
use chute_receiver::fleet::{Channel, Dispatcher, ListenerFleet};
use chute_receiver::ingest::handle_data_session;
use chute_receiver::sysports::{handle_ack, handle_health, handle_telemetry};
use chute_receiver::{Assembler, ChunkStore};
use chute_sender::pipeline::run_producer;
use chute_sender::{Chunker, Scanner, SenderConfig, SenderEngine, SidebandClient};

/// A receiver wired exactly like the binary, on test-local ports.
struct Receiver {
    fleet: Arc<ListenerFleet>,
    store: Arc<ChunkStore>,
    root: PathBuf,
    data_base: u16,
}

/// Pick a port base unlikely to collide across concurrent test binaries.
fn test_base(offset: u16) -> u16 {
    30000 + (std::process::id() % 10000) as u16 + offset
}

async fn start_receiver(
    root: &Path,
    sys_base: u16,
    data_base: u16,
    data_listeners: usize,
    ttl_secs: u64,
) -> Receiver {
    let ttl_cell = Arc::new(AtomicU64::new(ttl_secs));
    let store = Arc::new(ChunkStore::new(root, ttl_cell).unwrap());
    let assembler = Arc::new(Assembler::new(store.files_dir()).unwrap());
    let metrics = Arc::new(Mutex::new(MetricsWindow::new("receiver")));

    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let dispatcher: Dispatcher = {
        let store = Arc::clone(&store);
        let assembler = Arc::clone(&assembler);
        let metrics = Arc::clone(&metrics);
        Arc::new(move |channel, socket| match channel {
            Channel::Health => {
                tokio::spawn(handle_health(socket));
            }
            Channel::Telemetry => {
                tokio::spawn(handle_telemetry(socket, Arc::clone(&metrics)));
            }
            Channel::Ack => {
                tokio::spawn(handle_ack(socket));
            }
            Channel::Control => {
                let _ = control_tx.send(socket);
            }
            Channel::Data(_) => {
                tokio::spawn(handle_data_session(
                    socket,
                    Arc::clone(&store),
                    Arc::clone(&assembler),
                    Arc::clone(&metrics),
                ));
            }
        })
    };

    let fleet = Arc::new(ListenerFleet::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        sys_base,
        data_base,
        dispatcher,
    ));
    fleet.start(data_listeners).await.unwrap();

    let control_state = Arc::new(ControlState {
        fleet: Arc::clone(&fleet),
        store: Arc::clone(&store),
        metrics,
    });
    tokio::spawn(async move {
        while let Some(socket) = control_rx.recv().await {
            tokio::spawn(handle_control_session(socket, Arc::clone(&control_state)));
        }
    });

    Receiver {
        fleet,
        store,
        root: root.to_path_buf(),
        data_base,
    }
}

/// Run the full sender pipeline over `watch_dir` once and drain it.
async fn relay_directory(watch_dir: &Path, chunk_size: usize, config: SenderConfig) {
    let queue = Arc::new(BoundedQueue::new(32).unwrap());
    let sideband = Arc::new(SidebandClient::connect("127.0.0.1", 1).await.unwrap());
    let engine = SenderEngine::new(Arc::clone(&queue), config, Arc::clone(&sideband)).unwrap();
    engine.start();

    // The scanner gets its own token: cancelling it closes the descriptor
    // channel, and the producer then drains everything already scanned.
    let scan_cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let scanner = Scanner::new(watch_dir.to_path_buf(), Duration::from_millis(50));
    let scanner_task = tokio::spawn(scanner.run(tx, scan_cancel.clone()));
    let producer = tokio::spawn(run_producer(
        rx,
        Arc::clone(&queue),
        Chunker::new(chunk_size).unwrap(),
        3,
        sideband,
        CancellationToken::new(),
    ));

    // One scan pass is enough for a pre-populated directory.
    tokio::time::sleep(Duration::from_millis(200)).await;
    scan_cancel.cancel();
    scanner_task.await.unwrap();
    producer.await.unwrap();
    queue.close();
    engine.stop().await;
}

async fn wait_for_file(path: &Path) -> Vec<u8> {
    for _ in 0..250 {
        // The rename is atomic, so an existing file is a complete file.
        if path.exists() {
            return std::fs::read(path).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("file {} never appeared", path.display());
}

async fn wait_for_empty_dir(path: &Path) {
    for _ in 0..250 {
        let leftover = std::fs::read_dir(path).map(|e| e.count()).unwrap_or(0);
        if leftover == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("directory {} never emptied", path.display());
}

fn pseudo_random_bytes(len: usize) -> Vec<u8> {
    // Deterministic LCG; incompressible enough to span many chunks.
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

#[tokio::test]
async fn single_small_file_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let watch = tempfile::tempdir().unwrap();
    std::fs::write(watch.path().join("hello.bin"), b"Hello").unwrap();

    let receiver = start_receiver(root.path(), test_base(0), test_base(50), 2, 300).await;

    relay_directory(
        watch.path(),
        1024 * 1024,
        SenderConfig {
            connections: 2,
            base_port: receiver.data_base,
            ..SenderConfig::default()
        },
    )
    .await;

    let content = wait_for_file(&receiver.root.join("files/hello.bin")).await;
    assert_eq!(content, b"Hello");

    // Patches are cleaned up after publication and the entry forgotten.
    wait_for_empty_dir(&receiver.root.join("patches")).await;
    assert_eq!(receiver.store.pending_payloads(), 0);

    receiver.fleet.stop().await;
}

#[tokio::test]
async fn multi_chunk_file_reassembles_across_connections() {
    let root = tempfile::tempdir().unwrap();
    let watch = tempfile::tempdir().unwrap();
    let original = pseudo_random_bytes(64 * 1024);
    std::fs::write(watch.path().join("big.bin"), &original).unwrap();

    let receiver = start_receiver(root.path(), test_base(100), test_base(150), 4, 300).await;

    // 1 KiB chunks over four connections: the compressed stream splits
    // into dozens of chunks that arrive interleaved.
    relay_directory(
        watch.path(),
        1024,
        SenderConfig {
            connections: 4,
            base_port: receiver.data_base,
            ..SenderConfig::default()
        },
    )
    .await;

    let content = wait_for_file(&receiver.root.join("files/big.bin")).await;
    assert_eq!(content, original);

    receiver.fleet.stop().await;
}

#[tokio::test]
async fn multiple_files_all_arrive() {
    let root = tempfile::tempdir().unwrap();
    let watch = tempfile::tempdir().unwrap();
    let mut expected = Vec::new();
    for i in 0..5 {
        let name = format!("file_{}.bin", i);
        let content = pseudo_random_bytes(4096 + i * 977);
        std::fs::write(watch.path().join(&name), &content).unwrap();
        expected.push((name, content));
    }

    let receiver = start_receiver(root.path(), test_base(200), test_base(250), 3, 300).await;

    relay_directory(
        watch.path(),
        2048,
        SenderConfig {
            connections: 3,
            base_port: receiver.data_base,
            ..SenderConfig::default()
        },
    )
    .await;

    for (name, content) in expected {
        let published = wait_for_file(&receiver.root.join("files").join(&name)).await;
        assert_eq!(published, content, "content mismatch for {}", name);
    }

    receiver.fleet.stop().await;
}

async fn control_roundtrip(stream: &mut TcpStream, command: &str) -> String {
    stream
        .write_all(format!("{}\n", command).as_bytes())
        .await
        .unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line
}

#[tokio::test]
async fn runtime_scale_binds_new_data_ports() {
    let root = tempfile::tempdir().unwrap();
    let sys_base = test_base(300);
    let data_base = test_base(350);
    let receiver = start_receiver(root.path(), sys_base, data_base, 2, 120).await;

    let mut control = TcpStream::connect(("127.0.0.1", sys_base + 2)).await.unwrap();
    assert_eq!(
        control_roundtrip(&mut control, "SCALE_DATA 5").await,
        "OK data listeners=5\n"
    );
    assert_eq!(receiver.fleet.data_count(), 5);

    // Three new ports accept; the two prior ones still do.
    for i in 0..5 {
        let port = data_base + i;
        assert!(
            TcpStream::connect(("127.0.0.1", port)).await.is_ok(),
            "data port {} not accepting after scale",
            port
        );
    }

    // TTL is untouched by the resize.
    assert_eq!(
        control_roundtrip(&mut control, "STATUS").await,
        "OK listeners=5 ttl=120\n"
    );
    assert_eq!(control_roundtrip(&mut control, "QUIT").await, "OK\n");

    receiver.fleet.stop().await;
}

#[tokio::test]
async fn system_ports_answer_their_lines() {
    let root = tempfile::tempdir().unwrap();
    let sys_base = test_base(400);
    let receiver = start_receiver(root.path(), sys_base, test_base(450), 1, 300).await;

    use tokio::io::AsyncReadExt;
    let mut health = TcpStream::connect(("127.0.0.1", sys_base)).await.unwrap();
    let mut buf = Vec::new();
    health.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"OK\n");

    let mut ack = TcpStream::connect(("127.0.0.1", sys_base + 3)).await.unwrap();
    let mut buf = Vec::new();
    ack.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"ACK\n");

    let mut telemetry = TcpStream::connect(("127.0.0.1", sys_base + 1)).await.unwrap();
    let mut buf = Vec::new();
    telemetry.read_to_end(&mut buf).await.unwrap();
    let line = String::from_utf8(buf).unwrap();
    assert!(line.contains("\"component\":\"receiver\""));

    receiver.fleet.stop().await;
}
