//! Telemetry monitor for one session.

use std::time::Duration;

use pool_net::Result;
use pool_net::endpoint::Endpoint;
use tracing::info;

/// Dial `addr` and print session telemetry every `interval` until the
/// session goes away.
pub async fn run(endpoint: &Endpoint, addr: &str, interval: Duration) -> Result<()> {
    let conn = endpoint.dial("pool", addr).await?;
    info!(session = conn.session_index(), peer = %conn.remote_addr(), "monitoring");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let info = match conn.session_info() {
            Ok(info) => info,
            Err(e) => {
                info!(error = %e, "session gone");
                break;
            }
        };
        let t = info.telemetry;
        println!(
            "state={} rtt={:?} jitter={:?} loss={}ppm throughput={} B/s mtu={} queue={} sent={} recv={}",
            info.state,
            t.rtt,
            t.jitter,
            t.loss_rate_ppm,
            t.throughput_bps,
            t.mtu,
            t.queue_depth,
            info.bytes_sent,
            info.bytes_recv,
        );
    }

    let _ = conn.close();
    Ok(())
}
