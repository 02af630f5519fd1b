//! One-shot file transfer over a single session.
//!
//! The sender writes the file as a run of messages of at most
//! [`MAX_PAYLOAD`] bytes and closes the session. The receiver accepts one
//! session and appends every message to the output file until the session
//! goes away.

use std::io;
use std::path::Path;

use pool_net::core::constants::MAX_PAYLOAD;
use pool_net::endpoint::Endpoint;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// Transfer failures.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Session-level failure.
    #[error(transparent)]
    Pool(#[from] pool_net::Error),

    /// Local file failure.
    #[error("{path}: {source}")]
    File {
        /// File being read or written.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

fn file_error(path: &Path) -> impl FnOnce(io::Error) -> TransferError + '_ {
    move |source| TransferError::File {
        path: path.display().to_string(),
        source,
    }
}

/// Dial `addr` and send `path` in [`MAX_PAYLOAD`]-sized messages.
pub async fn send(endpoint: &Endpoint, addr: &str, path: &Path) -> Result<u64, TransferError> {
    let mut file = File::open(path).await.map_err(file_error(path))?;
    let conn = endpoint.dial("pool", addr).await?;
    info!(session = conn.session_index(), peer = %conn.remote_addr(), file = %path.display(), "sending");

    let mut buf = vec![0u8; MAX_PAYLOAD];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await.map_err(file_error(path))?;
        if n == 0 {
            break;
        }
        conn.write(&buf[..n]).await?;
        total += n as u64;
        debug!(chunk = n, total, "sent");
    }

    conn.close()?;
    info!(bytes = total, "transfer sent");
    Ok(total)
}

/// Listen on `addr`, accept one session and write everything it carries to
/// `path`.
pub async fn receive(endpoint: &Endpoint, addr: &str, path: &Path) -> Result<u64, TransferError> {
    let listener = endpoint.listen("pool", addr)?;
    info!(addr = %listener.local_addr(), file = %path.display(), "waiting for sender");

    let conn = listener.accept().await?;
    info!(session = conn.session_index(), peer = %conn.remote_addr(), "receiving");

    let mut file = File::create(path).await.map_err(file_error(path))?;
    let mut buf = vec![0u8; MAX_PAYLOAD];
    let mut total = 0u64;
    loop {
        let n = match conn.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "session ended");
                break;
            }
        };
        file.write_all(&buf[..n]).await.map_err(file_error(path))?;
        total += n as u64;
    }
    file.flush().await.map_err(file_error(path))?;

    let _ = conn.close();
    let _ = listener.close();
    info!(bytes = total, "transfer received");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_net::device::memory::MemoryDriver;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_receive_writes_every_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.bin");
        let data: Vec<u8> = (0..MAX_PAYLOAD * 2 + 100).map(|i| i as u8).collect();

        let driver = MemoryDriver::new();
        let receiver = {
            let endpoint = Endpoint::with_opener(driver.clone());
            let path = path.clone();
            tokio::spawn(async move { receive(&endpoint, ":9253", &path).await })
        };
        while driver.listening().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let session = driver.accept_peer("10.0.0.9:40000".parse().unwrap()).unwrap();
        let peer = driver.peer(session);
        for chunk in data.chunks(MAX_PAYLOAD) {
            assert!(peer.deliver(0, chunk).unwrap());
        }

        let expected = data.len() as u64;
        while std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        driver.teardown(session);

        assert_eq!(receiver.await.unwrap().unwrap(), expected);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(driver.listening(), None);
    }

    #[tokio::test]
    async fn test_send_missing_file_does_not_dial() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::new();
        let endpoint = Endpoint::with_opener(driver.clone());

        let result = send(&endpoint, "10.0.0.9:9253", &dir.path().join("absent")).await;
        assert!(matches!(result, Err(TransferError::File { .. })));
        assert_eq!(driver.session_count(), 0);
    }
}
