//! Dialed connections against the in-memory driver.

#![cfg(feature = "memory")]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pool_net::core::constants::MAX_PAYLOAD;
use pool_net::device::memory::MemoryDriver;
use pool_net::prelude::*;

async fn dial(driver: &MemoryDriver) -> Connection {
    Endpoint::with_opener(driver.clone())
        .dial("pool", "10.0.0.1:9253")
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_hello() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;

    let peer = driver.peer(conn.session_index());
    let echo = thread::spawn(move || peer.echo(0, Duration::from_millis(200)));

    assert_eq!(conn.write(b"hello").await.unwrap(), 5);
    let mut buf = [0u8; 64];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello");

    conn.close().unwrap();
    assert_eq!(echo.join().unwrap(), 1);
}

#[tokio::test]
async fn test_messages_keep_boundaries() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;
    let peer = driver.peer(conn.session_index());

    for msg in [&b"one"[..], b"two", b"three"] {
        conn.write(msg).await.unwrap();
    }
    assert_eq!(peer.next_sent(0, Duration::from_secs(1)).unwrap(), b"one");
    assert_eq!(peer.next_sent(0, Duration::from_secs(1)).unwrap(), b"two");
    assert_eq!(peer.next_sent(0, Duration::from_secs(1)).unwrap(), b"three");
}

#[tokio::test]
async fn test_largest_payload_is_accepted() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;

    let max = vec![0xab; MAX_PAYLOAD];
    assert_eq!(conn.write(&max).await.unwrap(), MAX_PAYLOAD);

    let before = driver.calls();
    let over = vec![0xab; MAX_PAYLOAD + 1];
    assert!(matches!(conn.write(&over).await, Err(Error::MessageTooLarge)));
    assert_eq!(driver.calls(), before);
}

#[tokio::test]
async fn test_short_read_buffer() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;
    driver
        .peer(conn.session_index())
        .deliver(0, &[7u8; 100])
        .unwrap();

    let mut small = [0u8; 10];
    assert!(matches!(
        conn.read(&mut small).await,
        Err(Error::BufferTooSmall)
    ));

    let mut big = [0u8; 128];
    assert_eq!(conn.read(&mut big).await.unwrap(), 100);
}

#[tokio::test]
async fn test_expired_deadline_fails_fast() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;

    conn.set_read_deadline(Some(Instant::now() - Duration::from_millis(100)));
    let start = Instant::now();
    let err = conn.read(&mut [0u8; 16]).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_retryable());
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn test_deadline_is_read_at_call_start() {
    let driver = MemoryDriver::new();
    let conn = Arc::new(dial(&driver).await);

    conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(40)));
    let reader = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.read(&mut [0u8; 16]).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Clearing the deadline does not rescue the read already in flight.
    conn.set_read_deadline(None);
    assert!(matches!(reader.await.unwrap(), Err(Error::Timeout)));
}

#[tokio::test]
async fn test_closed_connection() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;

    conn.close().unwrap();
    assert!(matches!(conn.read(&mut [0u8; 8]).await, Err(Error::Closed)));
    assert!(matches!(conn.write(b"x").await, Err(Error::Closed)));
    assert!(matches!(conn.close(), Err(Error::Closed)));
}

#[tokio::test]
async fn test_channel_isolation() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;
    let peer = driver.peer(conn.session_index());

    let five = conn.open_channel(5).unwrap();
    five.write(b"five").await.unwrap();
    assert_eq!(peer.next_sent(5, Duration::from_secs(1)).unwrap(), b"five");

    five.close().unwrap();
    assert!(matches!(five.write(b"again").await, Err(Error::Closed)));

    // Messages for the closed channel are dropped by the driver.
    assert!(!peer.deliver(5, b"late").unwrap());

    conn.write(b"zero").await.unwrap();
    assert!(peer.echo_once(0, Duration::from_secs(1)));
    let mut buf = [0u8; 16];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"zero");
}

#[tokio::test]
async fn test_telemetry_lookup() {
    let driver = MemoryDriver::new();
    let conn = dial(&driver).await;
    let index = conn.session_index();

    driver
        .set_telemetry(
            index,
            Telemetry {
                rtt: Duration::from_micros(850),
                loss_rate_ppm: 2_500,
                mtu: 1400,
                ..Default::default()
            },
        )
        .unwrap();

    let telemetry = conn.telemetry().unwrap();
    assert_eq!(telemetry.rtt, Duration::from_micros(850));
    assert_eq!(telemetry.mtu, 1400);

    let info = conn.session_info().unwrap();
    assert_eq!(info.index, index);
    assert_eq!(info.peer, conn.remote_addr());
    assert_eq!(conn.session_state().unwrap().to_string(), "ESTABLISHED");

    driver.teardown(index);
    assert!(matches!(conn.telemetry(), Err(Error::NotEstablished)));
}

#[tokio::test]
async fn test_dial_into_missing_driver() {
    let driver = MemoryDriver::new();
    driver.set_available(false);
    let result = Endpoint::with_opener(driver)
        .dial("pool", "10.0.0.1:9253")
        .await;
    assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
}

#[tokio::test]
async fn test_dial_v6_peer() {
    let driver = MemoryDriver::new();
    let conn = Endpoint::with_opener(driver.clone())
        .dial("pool6", "[::1]:9253")
        .await
        .unwrap();
    assert_eq!(conn.remote_addr().to_string(), "[::1]:9253");

    let info = conn.session_info().unwrap();
    assert_eq!(info.peer.to_string(), "[::1]:9253");
}
