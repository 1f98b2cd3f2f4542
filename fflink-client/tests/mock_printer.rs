//! Integration tests against a scripted mock printer on loopback.

use fflink_client::{
    Client, ClientError, Connection, ConnectionConfig, Endpoint, ExecOptions, Session, UploadState,
};
use fflink_protocol::packet::{chunk_checksum, CHUNK_SIZE, PACKET_HEADER_SIZE, PACKET_MAGIC};
use fflink_protocol::parse::Reply;
use fflink_protocol::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const OK: &[u8] = b"ok\r\n";

/// Frame-oriented reader over the mock's accepted socket.
struct MockIo {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl MockIo {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn fill(&mut self) -> usize {
        let mut tmp = [0u8; 4096];
        let n = self.stream.read(&mut tmp).await.expect("mock read");
        self.buf.extend_from_slice(&tmp[..n]);
        n
    }

    /// Reads one `\n`-terminated command frame.
    async fn next_frame(&mut self) -> Vec<u8> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                return self.buf.drain(..=pos).collect();
            }
            assert!(self.fill().await > 0, "peer closed before frame completed");
        }
    }

    /// Reads one complete upload data packet (header + padded payload).
    async fn next_packet(&mut self) -> Vec<u8> {
        let total = PACKET_HEADER_SIZE + CHUNK_SIZE;
        while self.buf.len() < total {
            assert!(self.fill().await > 0, "peer closed before packet completed");
        }
        self.buf.drain(..total).collect()
    }

    /// Bytes received but not yet consumed as a frame.
    fn buffered(&self) -> usize {
        self.buf.len()
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("mock write");
    }

    /// Expects and acknowledges the `M601 S1` control-mode handshake.
    async fn accept_handshake(&mut self) {
        let frame = self.next_frame().await;
        assert_eq!(frame, b"~M601 S1\r\n");
        self.send(OK).await;
    }
}

async fn spawn_mock() -> (TcpListener, ConnectionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let port = listener.local_addr().unwrap().port();
    let config = ConnectionConfig::new(Endpoint::new("127.0.0.1").with_port(port))
        .with_connect_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2))
        .with_upload_timeout(Duration::from_secs(2));
    (listener, config)
}

#[tokio::test]
async fn test_handshake_and_temperature_scenario() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M105\r\n");
        io.send(b"T0:200/210 ok\r\n").await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();
    assert!(client.is_ready().await);

    let report = client.temperature().await.unwrap();
    assert_eq!(report.extruder.current, 200.0);
    assert_eq!(report.extruder.target, 210.0);

    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_home_all_sends_exact_frame() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~G28\r\n");
        io.send(OK).await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~G28 Z\r\n");
        io.send(OK).await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();
    client.home(None).await.unwrap();
    client.home(Some(fflink_protocol::Axis::Z)).await.unwrap();
    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_concurrent_executes_do_not_interleave() {
    let (listener, config) = spawn_mock().await;
    const CALLS: usize = 8;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        for _ in 0..CALLS {
            let frame = io.next_frame().await;
            assert_eq!(frame, b"~M105\r\n");
            // One command in flight: nothing from a second call may arrive
            // before this one is answered
            assert_eq!(io.buffered(), 0);
            io.send(b"T0:25 /0 B:25 /0\r\nok\r\n").await;
        }
    });

    let client = Arc::new(Client::new(config));
    client.connect().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..CALLS {
        let client = client.clone();
        tasks.push(tokio::spawn(
            async move { client.temperature().await },
        ));
    }
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.extruder.current, 25.0);
    }

    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_timeout_retry_budget() {
    let (listener, config) = spawn_mock().await;
    let sends = Arc::new(AtomicUsize::new(0));
    let mock_sends = sends.clone();

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        // Swallow every command without answering
        loop {
            let frame = io.next_frame().await;
            assert_eq!(frame, b"~M105\r\n");
            mock_sends.fetch_add(1, Ordering::SeqCst);
        }
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    let opts = ExecOptions::new()
        .with_timeout(Duration::from_millis(100))
        .with_retries(2);
    let result = client.session().execute(&Command::Temperature, opts).await;
    assert!(matches!(result, Err(ClientError::Timeout)));

    // Give the mock a moment to consume the final attempt
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sends.load(Ordering::SeqCst), 3);

    mock.abort();
    client.close().await;
}

#[tokio::test]
async fn test_retry_recovers_lost_send() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        // The first send vanishes; only the re-sent frame gets an answer
        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M105\r\n");
        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M105\r\n");
        io.send(b"T0:200 /210 B:60 /60\r\nok\r\n").await;

        // The recovered reply settled the call: the next command still
        // pairs with its own answer
        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M27\r\n");
        io.send(b"SD printing byte 1/4\r\nok\r\n").await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    let opts = ExecOptions::new()
        .with_timeout(Duration::from_millis(200))
        .with_retries(2);
    let reply = client
        .session()
        .execute(&Command::Temperature, opts)
        .await
        .unwrap();
    match reply {
        Reply::Temperature(report) => {
            assert_eq!(report.extruder.current, 200.0);
            assert_eq!(report.extruder.target, 210.0);
        }
        other => panic!("expected a temperature report, got {:?}", other),
    }

    let progress = client.progress().await.unwrap();
    assert_eq!(progress.printed_bytes, 1);

    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_exchange_deadline_spans_write_and_read() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        // Swallow the command and hold the socket open
        let _ = io.next_frame().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    let opts = ExecOptions::new().with_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let result = client.session().execute(&Command::Temperature, opts).await;
    assert!(matches!(result, Err(ClientError::Timeout)));
    // One absolute deadline covers the frame write and the reply read
    assert!(started.elapsed() < Duration::from_millis(400));

    mock.abort();
    client.close().await;
}

#[tokio::test]
async fn test_not_ready_before_handshake_sends_nothing() {
    let (listener, config) = spawn_mock().await;
    let received = Arc::new(AtomicUsize::new(0));
    let mock_received = received.clone();

    let mock = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut tmp = [0u8; 1024];
        loop {
            match stream.read(&mut tmp).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    mock_received.fetch_add(n, Ordering::SeqCst);
                }
            }
        }
    });

    let session = Session::new(Connection::new(config));
    session.connect().await.unwrap();
    // No handshake: every operation must be rejected before any wire traffic
    let result = session
        .execute(&Command::Temperature, ExecOptions::new())
        .await;
    assert!(matches!(result, Err(ClientError::NotReady)));

    session.close().await;
    mock.await.unwrap();
    assert_eq!(received.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stale_late_response_discarded() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        // Answer the progress query well past the caller's deadline
        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M27\r\n");
        tokio::time::sleep(Duration::from_millis(300)).await;
        io.send(b"SD printing byte 1/2\r\nok\r\n").await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M105\r\n");
        io.send(b"T0:200 /210 B:60 /60\r\nok\r\n").await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    let opts = ExecOptions::new().with_timeout(Duration::from_millis(100));
    let result = client.session().execute(&Command::Progress, opts).await;
    assert!(matches!(result, Err(ClientError::Timeout)));

    // The stray progress reply must not be mistaken for the temperature reply
    let report = client.temperature().await.unwrap();
    assert_eq!(report.extruder.current, 200.0);

    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_connection_lost_requires_reconstruction() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        // Drop the socket mid-exchange
        let _ = io.next_frame().await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    let result = client.temperature().await;
    assert!(matches!(result, Err(ClientError::ConnectionLost)));

    // The closed connection is never silently reopened
    let result = client.temperature().await;
    assert!(matches!(result, Err(ClientError::NotReady)));

    mock.await.unwrap();
}

#[tokio::test]
async fn test_upload_round_trip() {
    let (listener, config) = spawn_mock().await;

    // 4 full chunks plus a 100-byte tail
    let content: Vec<u8> = (0..4 * CHUNK_SIZE + 100).map(|i| (i % 251) as u8).collect();
    let expected = content.clone();
    let total_len = content.len();

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M650\r\n");
        io.send(OK).await;

        let frame = io.next_frame().await;
        assert_eq!(
            frame,
            format!("~M28 {} 0:/user/test.gcode\r\n", total_len).into_bytes()
        );
        io.send(OK).await;

        let mut received = Vec::new();
        let mut remaining = total_len;
        let mut counter = 0u32;
        while remaining > 0 {
            let packet = io.next_packet().await;
            let data_len = remaining.min(CHUNK_SIZE);

            assert_eq!(&packet[0..4], &PACKET_MAGIC);
            assert_eq!(&packet[4..8], &counter.to_be_bytes());
            assert_eq!(&packet[8..12], &(CHUNK_SIZE as u32).to_be_bytes());
            let data = &packet[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + data_len];
            assert_eq!(&packet[12..16], &chunk_checksum(data).to_be_bytes());
            received.extend_from_slice(data);

            io.send(OK).await;
            remaining -= data_len;
            counter += 1;
        }
        assert_eq!(received, expected);

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M29\r\n");
        io.send(OK).await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();
    client.upload_file("test.gcode", &content).await.unwrap();
    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_upload_checksum_rejection_aborts() {
    let (listener, config) = spawn_mock().await;
    let packets = Arc::new(AtomicUsize::new(0));
    let mock_packets = packets.clone();

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        let _ = io.next_frame().await; // M650
        io.send(OK).await;
        let _ = io.next_frame().await; // M28
        io.send(OK).await;

        // Acknowledge chunks 0 and 1, reject chunk 2
        for i in 0..3 {
            let _ = io.next_packet().await;
            mock_packets.fetch_add(1, Ordering::SeqCst);
            if i < 2 {
                io.send(OK).await;
            } else {
                io.send(b"Error: CRC mismatch\r\nok\r\n").await;
            }
        }
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    let content = vec![0x42u8; 5 * CHUNK_SIZE];
    let mut uploader = client.uploader();
    uploader.begin("part.gcode", content.len() as u64).await.unwrap();

    let mut chunks = content.chunks(CHUNK_SIZE);
    uploader.transfer_chunk(chunks.next().unwrap()).await.unwrap();
    uploader.transfer_chunk(chunks.next().unwrap()).await.unwrap();

    let result = uploader.transfer_chunk(chunks.next().unwrap()).await;
    match result {
        Err(ClientError::Checksum { offset }) => {
            // Last acknowledged byte is the end of chunk 2
            assert_eq!(offset, 2 * CHUNK_SIZE as u64);
        }
        other => panic!("expected checksum rejection, got {:?}", other),
    }
    assert_eq!(uploader.state(), UploadState::Aborted);
    assert_eq!(uploader.session().unwrap().offset, 2 * CHUNK_SIZE as u64);

    // An aborted transfer refuses further chunks; nothing else hits the wire
    let result = uploader.transfer_chunk(chunks.next().unwrap()).await;
    assert!(matches!(result, Err(ClientError::UploadState(_))));
    assert_eq!(packets.load(Ordering::SeqCst), 3);

    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_upload_window_excludes_other_commands() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M650\r\n");
        io.send(OK).await;
        let frame = io.next_frame().await;
        assert!(frame.starts_with(b"~M28 "));
        io.send(OK).await;

        // While the file is open the only traffic is data packets and the
        // close frame; an interleaved command would desync these reads
        let _ = io.next_packet().await;
        io.send(OK).await;
        let _ = io.next_packet().await;
        io.send(OK).await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M29\r\n");
        io.send(OK).await;

        // Only now may the queued query reach the wire
        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M105\r\n");
        io.send(b"T0:25 /0 B:25 /0\r\nok\r\n").await;
    });

    let client = Arc::new(Client::new(config));
    client.connect().await.unwrap();

    let content = vec![0x11u8; 2 * CHUNK_SIZE];
    let mut uploader = client.uploader();
    uploader
        .begin("lock.gcode", content.len() as u64)
        .await
        .unwrap();

    // A concurrent query queues behind the whole transfer window
    let rival = {
        let client = client.clone();
        tokio::spawn(async move { client.temperature().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    for chunk in content.chunks(CHUNK_SIZE) {
        uploader.transfer_chunk(chunk).await.unwrap();
    }
    uploader.complete().await.unwrap();

    let report = rival.await.unwrap().unwrap();
    assert_eq!(report.extruder.current, 25.0);

    client.close().await;
    mock.await.unwrap();
}

#[tokio::test]
async fn test_round_trip_position_and_progress() {
    let (listener, config) = spawn_mock().await;

    let mock = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = MockIo::new(stream);
        io.accept_handshake().await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~G1 X50 Y50 F3000\r\n");
        io.send(b"CMD G1 Received.\r\nok\r\n").await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M114\r\n");
        io.send(b"CMD M114 Received.\r\nX:50 Y:50 Z:10.3\r\nok\r\n").await;

        let frame = io.next_frame().await;
        assert_eq!(frame, b"~M27\r\n");
        io.send(b"SD printing byte 2048/4096\r\nok\r\n").await;
    });

    let client = Client::new(config);
    client.connect().await.unwrap();

    client.move_to(Some(50.0), Some(50.0), None, None).await.unwrap();

    let pos = client.position().await.unwrap();
    assert_eq!((pos.x, pos.y, pos.z), (50.0, 50.0, 10.3));

    let progress = client.progress().await.unwrap();
    assert_eq!(progress.printed_bytes, 2048);
    assert_eq!(progress.percentage(), Some(50.0));

    client.close().await;
    mock.await.unwrap();
}
