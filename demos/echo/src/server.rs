//! Echo server: every message is written back on the same session.

use pool_net::endpoint::Endpoint;
use pool_net::{Connection, Result};
use tracing::{info, warn};

/// Accept sessions on `addr` forever, echoing each on its own task.
pub async fn run(endpoint: &Endpoint, addr: &str) -> Result<()> {
    let listener = endpoint.listen("pool", addr)?;
    info!(addr = %listener.local_addr(), "listening");

    loop {
        match listener.accept().await {
            Ok(conn) => {
                tokio::spawn(echo(conn));
            }
            Err(e) if e.is_retryable() => warn!(error = %e, "accept"),
            Err(e) => return Err(e),
        }
    }
}

async fn echo(conn: Connection) {
    let session = conn.session_index();
    info!(session, peer = %conn.remote_addr(), "new session");

    let mut buf = vec![0u8; 4096];
    loop {
        let n = match conn.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                info!(session, error = %e, "read ended");
                break;
            }
        };
        if let Err(e) = conn.write(&buf[..n]).await {
            warn!(session, error = %e, "write failed");
            break;
        }
    }
    let _ = conn.close();
}
