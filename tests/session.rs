//! Session integration tests: real session pairs wired back to back over an
//! in-memory duplex, plus raw-peer tests that speak the wire format by hand.

use std::time::Duration;

use braid::{Cmd, Config, Error, Frame, HEADER_SIZE, Session, WindowUpdate};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio::time::{Instant, sleep, timeout};

fn quiet_config() -> Config {
    Config {
        keep_alive_disabled: true,
        ..Config::default()
    }
}

fn session_pair(config: Config) -> (Session, Session) {
    let (a, b) = duplex(256 * 1024);
    let client = Session::client(a, config.clone()).unwrap();
    let server = Session::server(b, config).unwrap();
    (client, server)
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    timeout(Duration::from_secs(3), async {
        while !probe() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

#[tokio::test]
async fn open_accept_round_trip() {
    let (client, server) = session_pair(quiet_config());

    let opened = client.open_stream().await.unwrap();
    assert_eq!(opened.id(), 1);

    let accepted = server.accept_stream().await.unwrap();
    assert_eq!(accepted.id(), 1);

    assert_eq!(client.num_streams(), 1);
    assert_eq!(server.num_streams(), 1);
}

#[tokio::test]
async fn syn_frame_is_bit_exact_on_the_wire() {
    let (sock, mut raw) = duplex(64 * 1024);
    let client = Session::client(sock, quiet_config()).unwrap();

    let _stream = client.open_stream().await.unwrap();

    let mut hdr = [0u8; HEADER_SIZE];
    raw.read_exact(&mut hdr).await.unwrap();
    assert_eq!(hdr, [1, 0, 0, 0, 1, 0, 0, 0]);
}

#[tokio::test]
async fn push_frame_carries_payload_verbatim() {
    let (sock, mut raw) = duplex(64 * 1024);
    let client = Session::client(sock, quiet_config()).unwrap();

    let mut stream = client.open_stream().await.unwrap();
    assert_eq!(stream.write(b"hello").await.unwrap(), 5);

    let mut syn = [0u8; HEADER_SIZE];
    raw.read_exact(&mut syn).await.unwrap();

    let mut psh = [0u8; HEADER_SIZE];
    raw.read_exact(&mut psh).await.unwrap();
    assert_eq!(psh, [1, 2, 5, 0, 1, 0, 0, 0]);

    let mut payload = [0u8; 5];
    raw.read_exact(&mut payload).await.unwrap();
    assert_eq!(payload, [0x68, 0x65, 0x6c, 0x6c, 0x6f]);
}

#[tokio::test]
async fn window_reopens_after_peer_consumes() {
    let config = Config {
        max_receive_buffer: 5,
        keep_alive_disabled: true,
        ..Config::default()
    };
    let (client, server) = session_pair(config);

    let mut stream = client.open_stream().await.unwrap();
    assert_eq!(stream.write(b"hello").await.unwrap(), 5);

    // The advertised window is spent; the next write parks until the peer
    // reads and announces the consumption.
    let mut accepted = server.accept_stream().await.unwrap();
    let mut buf = [0u8; 5];
    let mut read = 0;
    while read < buf.len() {
        read += accepted.read(&mut buf[read..]).await.unwrap();
    }
    assert_eq!(&buf, b"hello");

    let second = timeout(Duration::from_secs(2), stream.write(b"x"))
        .await
        .expect("window never reopened")
        .unwrap();
    assert_eq!(second, 1);
}

#[tokio::test]
async fn write_parks_while_window_is_closed() {
    let config = Config {
        max_receive_buffer: 4,
        keep_alive_disabled: true,
        ..Config::default()
    };
    let (client, server) = session_pair(config);

    let mut stream = client.open_stream().await.unwrap();
    let writer = tokio::spawn(async move {
        let n = stream.write(b"abcdef").await.unwrap();
        (stream, n)
    });

    let mut accepted = server.accept_stream().await.unwrap();
    sleep(Duration::from_millis(150)).await;
    assert!(!writer.is_finished(), "write completed past a closed window");

    let mut buf = [0u8; 6];
    let mut read = 0;
    while read < buf.len() {
        read += accepted.read(&mut buf[read..]).await.unwrap();
    }
    assert_eq!(&buf, b"abcdef");

    let (_stream, written) = timeout(Duration::from_secs(2), writer)
        .await
        .expect("writer never finished")
        .unwrap();
    assert_eq!(written, 6);
}

#[tokio::test]
async fn large_transfer_preserves_order_and_content() {
    let config = Config {
        max_frame_size: 1024,
        max_receive_buffer: 32 * 1024,
        keep_alive_disabled: true,
        ..Config::default()
    };
    let (client, server) = session_pair(config);

    let payload: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let mut stream = client.open_stream().await.unwrap();
    let writer = tokio::spawn(async move { stream.write(&payload).await });

    let mut accepted = server.accept_stream().await.unwrap();
    let reader = tokio::spawn(async move {
        let mut received = vec![0u8; expected.len()];
        let mut read = 0;
        while read < received.len() {
            read += accepted.read(&mut received[read..]).await.unwrap();
        }
        received
    });

    let (written, received) = timeout(Duration::from_secs(10), async {
        let written = writer.await.unwrap().unwrap();
        let received = reader.await.unwrap();
        (written, received)
    })
    .await
    .expect("transfer stalled");

    assert_eq!(written, 200_000);
    assert_eq!(received, (0..200_000).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
}

#[tokio::test]
async fn fin_yields_buffered_bytes_then_eof() {
    let (sock, mut raw) = duplex(64 * 1024);
    let server = Session::server(sock, quiet_config()).unwrap();

    raw.write_all(&Frame::new(1, Cmd::Syn, 1).encode()).await.unwrap();
    raw.write_all(&Frame::with_data(1, Cmd::Psh, 1, b"abc".to_vec()).encode())
        .await
        .unwrap();
    raw.write_all(&Frame::new(1, Cmd::Fin, 1).encode()).await.unwrap();

    let mut stream = server.accept_stream().await.unwrap();
    let mut buf = [0u8; 8];
    let mut read = 0;
    loop {
        let n = stream.read(&mut buf[read..]).await.unwrap();
        if n == 0 {
            break;
        }
        read += n;
    }
    assert_eq!(read, 3);
    assert_eq!(&buf[..3], b"abc");

    // EOF is sticky.
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn half_close_still_accepts_writes() {
    let (client, server) = session_pair(quiet_config());

    let mut opened = client.open_stream().await.unwrap();
    let mut accepted = server.accept_stream().await.unwrap();

    // Server half-closes; the client can still send into the open half.
    accepted.close().await.unwrap();
    assert_eq!(opened.write(b"late").await.unwrap(), 4);

    let mut buf = [0u8; 4];
    assert_eq!(opened.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn version_mismatch_is_fatal() {
    let (sock, mut raw) = duplex(64 * 1024);
    let server = Session::server(sock, quiet_config()).unwrap();

    raw.write_all(&Frame::new(9, Cmd::Syn, 1).encode()).await.unwrap();

    assert!(matches!(
        server.accept_stream().await,
        Err(Error::InvalidProtocol)
    ));
    assert!(server.is_closed());
}

#[tokio::test]
async fn unknown_command_is_fatal() {
    let (sock, mut raw) = duplex(64 * 1024);
    let server = Session::server(sock, quiet_config()).unwrap();

    raw.write_all(&[1, 9, 0, 0, 1, 0, 0, 0]).await.unwrap();

    assert!(matches!(
        server.accept_stream().await,
        Err(Error::InvalidProtocol)
    ));
    assert!(server.is_closed());
}

#[tokio::test]
async fn consumed_overrun_is_fatal() {
    let (sock, mut raw) = duplex(64 * 1024);
    let client = Session::client(sock, quiet_config()).unwrap();

    let _stream = client.open_stream().await.unwrap();

    // The peer claims to have consumed bytes that were never written.
    let upd = WindowUpdate {
        consumed: 5,
        window: 100,
    };
    raw.write_all(&Frame::with_data(1, Cmd::Upd, 1, upd.encode().to_vec()).encode())
        .await
        .unwrap();

    assert!(matches!(client.accept_stream().await, Err(Error::Consumed)));
    assert!(client.is_closed());
    assert!(matches!(client.open_stream().await, Err(Error::ClosedPipe)));
}

#[tokio::test]
async fn close_is_once_only_and_fails_later_ops() {
    let (client, server) = session_pair(quiet_config());

    let _opened = client.open_stream().await.unwrap();
    let _accepted = server.accept_stream().await.unwrap();

    client.close().unwrap();
    assert!(matches!(client.close(), Err(Error::ClosedPipe)));
    assert!(client.is_closed());
    assert_eq!(client.num_streams(), 0);

    assert!(matches!(client.open_stream().await, Err(Error::ClosedPipe)));
    assert!(matches!(client.accept_stream().await, Err(Error::ClosedPipe)));

    timeout(Duration::from_secs(1), client.closed())
        .await
        .expect("close notification never fired");

    // The dropped transport surfaces as a read fault on the other side.
    wait_until(|| server.is_closed()).await;
    assert!(matches!(server.accept_stream().await, Err(Error::Io(_))));
}

#[tokio::test]
async fn accept_honors_deadline_without_consuming_backlog() {
    let (client, server) = session_pair(quiet_config());

    let _opened = client.open_stream().await.unwrap();
    wait_until(|| server.num_streams() == 1).await;

    // A deadline already in the past times out even though a stream waits.
    server.set_deadline(Some(Instant::now() - Duration::from_secs(1)));
    assert!(matches!(server.accept_stream().await, Err(Error::Timeout)));

    server.set_deadline(None);
    let accepted = timeout(Duration::from_secs(1), server.accept_stream())
        .await
        .expect("backlog entry was lost")
        .unwrap();
    assert_eq!(accepted.id(), 1);
}

#[tokio::test]
async fn accept_deadline_expires_while_waiting() {
    let (_client, server) = session_pair(quiet_config());

    server.set_deadline(Some(Instant::now() + Duration::from_millis(100)));
    let started = Instant::now();
    assert!(matches!(server.accept_stream().await, Err(Error::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn try_read_reports_would_block() {
    let (client, server) = session_pair(quiet_config());

    let mut opened = client.open_stream().await.unwrap();
    let mut accepted = server.accept_stream().await.unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(accepted.try_read(&mut buf), Err(Error::WouldBlock)));

    opened.write(b"data").await.unwrap();
    wait_until(|| server.num_streams() == 1).await;

    timeout(Duration::from_secs(1), async {
        loop {
            match accepted.try_read(&mut buf) {
                Ok(n) => break n,
                Err(Error::WouldBlock) => sleep(Duration::from_millis(5)).await,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    })
    .await
    .map(|n| assert_eq!(&buf[..n], b"data"))
    .expect("data never arrived");
}

#[tokio::test]
async fn closing_a_stream_removes_it_from_the_table() {
    let (client, server) = session_pair(quiet_config());

    let one = client.open_stream().await.unwrap();
    let _two = client.open_stream().await.unwrap();
    assert_eq!(client.num_streams(), 2);

    one.close().await.unwrap();
    assert_eq!(client.num_streams(), 1);

    // The peer sees the half-close as EOF on its side.
    let mut accepted = server.accept_stream().await.unwrap();
    assert_eq!(accepted.id(), 1);
    let mut buf = [0u8; 4];
    assert_eq!(accepted.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn dropping_a_stream_sends_fin() {
    let (client, server) = session_pair(quiet_config());

    let opened = client.open_stream().await.unwrap();
    let mut accepted = server.accept_stream().await.unwrap();

    drop(opened);
    assert_eq!(client.num_streams(), 0);

    let mut buf = [0u8; 4];
    let eof = timeout(Duration::from_secs(1), accepted.read(&mut buf))
        .await
        .expect("FIN never arrived")
        .unwrap();
    assert_eq!(eof, 0);
}

#[tokio::test]
async fn keepalive_closes_a_silent_peer() {
    let config = Config {
        keep_alive_interval: Duration::from_millis(50),
        keep_alive_timeout: Duration::from_millis(150),
        ..Config::default()
    };
    let (sock, _raw) = duplex(64 * 1024);
    let server = Session::server(sock, config).unwrap();

    timeout(Duration::from_secs(2), server.closed())
        .await
        .expect("silent peer did not trip the keepalive");
    assert!(server.is_closed());
}

#[tokio::test]
async fn keepalive_spares_a_receiver_parked_on_the_budget() {
    let config = Config {
        max_receive_buffer: 8,
        keep_alive_interval: Duration::from_millis(50),
        keep_alive_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    let (sock, mut raw) = duplex(64 * 1024);
    let server = Session::server(sock, config).unwrap();

    // Fill the receive budget, then go silent: the receiver is parked on
    // admission control, so silence must not kill the session.
    raw.write_all(&Frame::new(1, Cmd::Syn, 1).encode()).await.unwrap();
    raw.write_all(&Frame::with_data(1, Cmd::Psh, 1, vec![0x7a; 8]).encode())
        .await
        .unwrap();

    let mut stream = server.accept_stream().await.unwrap();
    sleep(Duration::from_millis(700)).await;
    assert!(!server.is_closed(), "closed while parked on spent budget");

    // Draining the stream refills the bucket; the next silent period is
    // conclusive and the session goes down.
    let mut buf = [0u8; 8];
    let mut read = 0;
    while read < buf.len() {
        read += stream.read(&mut buf[read..]).await.unwrap();
    }

    timeout(Duration::from_secs(2), server.closed())
        .await
        .expect("session survived conclusive silence");
}
