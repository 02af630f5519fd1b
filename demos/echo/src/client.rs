//! Interactive echo client: stdin lines out, echoes printed.

use std::sync::Arc;

use pool_net::Result;
use pool_net::endpoint::Endpoint;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Dial `addr`, send each stdin line and print what comes back.
pub async fn run(endpoint: &Endpoint, addr: &str) -> Result<()> {
    let conn = Arc::new(endpoint.dial("pool", addr).await?);
    info!(session = conn.session_index(), peer = %conn.remote_addr(), "connected");

    let reader = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match conn.read(&mut buf).await {
                    Ok(n) => println!("echo: {}", String::from_utf8_lossy(&buf[..n])),
                    Err(e) => {
                        info!(error = %e, "read ended");
                        return;
                    }
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin");
                break;
            }
        };
        conn.write(line.as_bytes()).await?;
    }

    conn.close()?;
    let _ = reader.await;
    Ok(())
}
