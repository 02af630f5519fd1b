//! Accepting inbound sessions from the in-memory driver.

#![cfg(all(feature = "memory", feature = "server"))]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pool_net::device::SessionState;
use pool_net::device::memory::MemoryDriver;
use pool_net::prelude::*;

fn listen(driver: &MemoryDriver) -> Listener {
    Endpoint::builder()
        .opener(driver.clone())
        .poll_interval(Duration::from_millis(5))
        .build()
        .listen("pool", ":9253")
        .unwrap()
}

#[tokio::test]
async fn test_accept_and_echo() {
    let driver = MemoryDriver::new();
    let listener = listen(&driver);

    let index = driver.accept_peer("10.1.1.1:50000".parse().unwrap()).unwrap();
    let conn = listener.accept().await.unwrap();
    assert_eq!(conn.session_index(), index);
    assert_eq!(conn.remote_addr().to_string(), "10.1.1.1:50000");
    assert_eq!(conn.local_addr().port(), 9253);

    // Server side echoes what the remote sends.
    let peer = driver.peer(index);
    peer.deliver(0, b"ping").unwrap();
    let mut buf = [0u8; 16];
    let n = conn.read(&mut buf).await.unwrap();
    conn.write(&buf[..n]).await.unwrap();
    assert_eq!(peer.next_sent(0, Duration::from_secs(1)).unwrap(), b"ping");
}

#[tokio::test]
async fn test_sequential_accepts_are_distinct() {
    let driver = MemoryDriver::new();
    let listener = listen(&driver);

    driver.accept_peer("10.1.1.1:1".parse().unwrap()).unwrap();
    driver.accept_peer("10.1.1.2:1".parse().unwrap()).unwrap();

    let a = listener.accept().await.unwrap();
    let b = listener.accept().await.unwrap();
    assert_ne!(a.session_index(), b.session_index());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_never_share_a_session() {
    const SESSIONS: usize = 8;

    let driver = MemoryDriver::new();
    let listener = Arc::new(listen(&driver));

    let mut waiters = Vec::new();
    for _ in 0..SESSIONS {
        let listener = Arc::clone(&listener);
        waiters.push(tokio::spawn(async move { listener.accept().await }));
    }
    for i in 0..SESSIONS {
        let peer = format!("10.2.0.{}:7000", i + 1);
        driver.accept_peer(peer.parse().unwrap()).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut seen = HashSet::new();
    for waiter in waiters {
        let conn = waiter.await.unwrap().unwrap();
        assert!(seen.insert(conn.session_index()), "session handed out twice");
    }
    assert_eq!(seen.len(), SESSIONS);
}

#[tokio::test]
async fn test_handshaking_sessions_wait() {
    let driver = MemoryDriver::new();
    let listener = listen(&driver);

    let index = driver.accept_peer("10.1.1.3:1".parse().unwrap()).unwrap();
    driver.set_state(index, SessionState::InitSent).unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(30), listener.accept())
            .await
            .is_err()
    );

    driver.set_state(index, SessionState::Established).unwrap();
    assert_eq!(listener.accept().await.unwrap().session_index(), index);
}

#[tokio::test]
async fn test_close_releases_listener() {
    let driver = MemoryDriver::new();
    let listener = listen(&driver);
    assert_eq!(driver.listening(), Some(9253));

    listener.close().unwrap();
    assert_eq!(driver.listening(), None);
    assert!(matches!(listener.accept().await, Err(Error::Closed)));
    assert!(matches!(listener.close(), Err(Error::Closed)));

    // Nothing listens any more.
    assert!(driver.accept_peer("10.1.1.4:1".parse().unwrap()).is_err());
}

#[tokio::test]
async fn test_accepted_close_keeps_listener() {
    let driver = MemoryDriver::new();
    let listener = listen(&driver);

    driver.accept_peer("10.1.1.5:1".parse().unwrap()).unwrap();
    let conn = listener.accept().await.unwrap();
    conn.close().unwrap();

    driver.accept_peer("10.1.1.6:1".parse().unwrap()).unwrap();
    let next = listener.accept().await.unwrap();
    assert_eq!(next.remote_addr().to_string(), "10.1.1.6:1");
}
