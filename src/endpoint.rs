//! Configuration and the dial/listen entry points.
//!
//! An [`Endpoint`] couples an [`EndpointConfig`] with the [`Opener`] that
//! produces device handles. The free functions [`dial`], [`dial_timeout`]
//! and [`listen`] use a default endpoint on `/dev/pool`.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use pool_net::endpoint::Endpoint;
//!
//! # async fn run() -> pool_net::core::Result<()> {
//! let endpoint = Endpoint::builder()
//!     .dial_timeout(Duration::from_secs(5))
//!     .build();
//!
//! let conn = endpoint.dial("pool", "10.0.0.1:9253").await?;
//! conn.write(b"hello").await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::addr::{self, Addr};
use crate::core::Result;
use crate::core::constants::{ACCEPT_POLL_INTERVAL, DEVICE_PATH, MIN_ACCEPT_POLL_INTERVAL};
use crate::device::{Device, Opener};
#[cfg(feature = "server")]
use crate::server::Listener;
use crate::transport::Connection;
use crate::transport::connection::local_addr_for;
use crate::transport::deadline;

pub use crate::addr::resolve;

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Character device of the driver.
    pub device_path: PathBuf,

    /// Handshake limit used by [`Endpoint::dial`]. `None` waits forever.
    pub dial_timeout: Option<Duration>,

    /// How often [`Listener::accept`](crate::server::Listener::accept)
    /// rescans the session table.
    pub poll_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEVICE_PATH),
            dial_timeout: None,
            poll_interval: ACCEPT_POLL_INTERVAL,
        }
    }
}

/// Builder for an [`Endpoint`].
#[derive(Debug, Default)]
pub struct EndpointBuilder {
    config: EndpointConfig,
    opener: Option<Arc<dyn Opener>>,
}

impl EndpointBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the character device path.
    pub fn device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.device_path = path.into();
        self
    }

    /// Set the default handshake timeout. Zero means no limit.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Set the accept poll interval. Values below 1 ms are raised to 1 ms.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.max(MIN_ACCEPT_POLL_INTERVAL);
        self
    }

    /// Produce device handles with `opener` instead of opening
    /// [`device_path`](EndpointConfig::device_path).
    pub fn opener(mut self, opener: impl Opener + 'static) -> Self {
        self.opener = Some(Arc::new(opener));
        self
    }

    /// Build the endpoint.
    pub fn build(self) -> Endpoint {
        let opener = match self.opener {
            Some(opener) => opener,
            None => device_opener(&self.config.device_path),
        };
        Endpoint {
            config: self.config,
            opener,
        }
    }
}

/// Entry point for dialing and listening.
#[derive(Debug, Clone)]
pub struct Endpoint {
    config: EndpointConfig,
    opener: Arc<dyn Opener>,
}

impl Endpoint {
    /// An endpoint on `/dev/pool` with default configuration.
    pub fn new() -> Self {
        EndpointBuilder::new().build()
    }

    /// An endpoint whose device handles come from `opener`.
    pub fn with_opener(opener: impl Opener + 'static) -> Self {
        EndpointBuilder::new().opener(opener).build()
    }

    /// Start configuring an endpoint.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// The configuration in use.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Resolve `address` for `network` without connecting.
    pub fn resolve(&self, network: &str, address: &str) -> Result<Addr> {
        addr::resolve(network, address)
    }

    /// Connect to a peer using the configured dial timeout.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection> {
        let timeout = self.config.dial_timeout.unwrap_or(Duration::ZERO);
        self.dial_timeout(network, address, timeout).await
    }

    /// Connect to a peer, giving the handshake at most `timeout`.
    ///
    /// A zero timeout means no limit. On expiry the handle is released and
    /// [`Error::Timeout`](crate::core::Error::Timeout) is returned; the
    /// driver may still finish the abandoned handshake on its own.
    pub async fn dial_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> Result<Connection> {
        let remote = resolve_off_runtime(network, address).await?;
        let device = Arc::new(Device::open_with(self.opener.as_ref())?);
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        debug!(peer = %remote, ?timeout, "dialing");
        let handshake = {
            let device = Arc::clone(&device);
            deadline::run_blocking(deadline, move || device.connect(&remote))
        };
        let session = match handshake.await {
            Ok(session) => session,
            Err(e) => {
                let _ = device.close();
                debug!(peer = %remote, error = %e, "dial failed");
                return Err(e);
            }
        };

        let local = local_addr_for(&remote);
        debug!(session, peer = %remote, %local, "session established");
        Ok(Connection::new(device, true, session, local, remote))
    }

    /// Listen for inbound sessions on `address`.
    ///
    /// `address` may be `":port"` to bind the wildcard address.
    #[cfg(feature = "server")]
    #[cfg_attr(docsrs, doc(cfg(feature = "server")))]
    pub fn listen(&self, network: &str, address: &str) -> Result<Listener> {
        let addr = addr::resolve(network, address)?;
        Listener::bind(self.opener.as_ref(), addr, self.config.poll_interval)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect to a peer on `/dev/pool`.
pub async fn dial(network: &str, address: &str) -> Result<Connection> {
    Endpoint::new().dial(network, address).await
}

/// Connect to a peer on `/dev/pool` with a handshake timeout.
pub async fn dial_timeout(network: &str, address: &str, timeout: Duration) -> Result<Connection> {
    Endpoint::new().dial_timeout(network, address, timeout).await
}

/// Listen on `/dev/pool`.
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub fn listen(network: &str, address: &str) -> Result<Listener> {
    Endpoint::new().listen(network, address)
}

/// [`resolve`] on the blocking pool. Name lookups and the services table
/// read block the calling thread.
async fn resolve_off_runtime(network: &str, address: &str) -> Result<Addr> {
    let (network, address) = (network.to_owned(), address.to_owned());
    deadline::run_blocking(None, move || addr::resolve(&network, &address)).await
}

#[cfg(target_os = "linux")]
fn device_opener(path: &std::path::Path) -> Arc<dyn Opener> {
    Arc::new(crate::device::DevicePath::new(path))
}

#[cfg(not(target_os = "linux"))]
fn device_opener(_path: &std::path::Path) -> Arc<dyn Opener> {
    Arc::new(NoDevice)
}

/// The driver only exists on Linux.
#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
struct NoDevice;

#[cfg(not(target_os = "linux"))]
impl Opener for NoDevice {
    fn open(&self) -> std::io::Result<Arc<dyn crate::device::Driver>> {
        Err(std::io::Error::from_raw_os_error(libc::ENODEV))
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::device::memory::MemoryDriver;

    #[test]
    fn test_config_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.device_path, PathBuf::from("/dev/pool"));
        assert_eq!(config.dial_timeout, None);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_builder() {
        let endpoint = Endpoint::builder()
            .device_path("/tmp/pool")
            .dial_timeout(Duration::from_secs(3))
            .poll_interval(Duration::from_millis(10))
            .build();
        assert_eq!(endpoint.config().device_path, PathBuf::from("/tmp/pool"));
        assert_eq!(endpoint.config().dial_timeout, Some(Duration::from_secs(3)));
        assert_eq!(endpoint.config().poll_interval, Duration::from_millis(10));

        let endpoint = Endpoint::builder()
            .dial_timeout(Duration::ZERO)
            .poll_interval(Duration::ZERO)
            .build();
        assert_eq!(endpoint.config().dial_timeout, None);
        assert_eq!(endpoint.config().poll_interval, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_dial_records_addresses() {
        let driver = MemoryDriver::new();
        let endpoint = Endpoint::with_opener(driver.clone());

        let conn = endpoint.dial("pool", "127.0.0.1:9253").await.unwrap();
        assert_eq!(conn.remote_addr().to_string(), "127.0.0.1:9253");
        assert_eq!(conn.local_addr().port(), 0);
        assert_eq!(driver.session_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dial_by_hostname() {
        let driver = MemoryDriver::new();
        let endpoint = Endpoint::with_opener(driver.clone());

        let conn = endpoint.dial("pool", "localhost:9253").await.unwrap();
        assert!(conn.remote_addr().ip().is_loopback());
        assert_eq!(conn.remote_addr().port(), 9253);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_resolve_off_runtime_matches_resolve() {
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
        });
        let resolved = resolve_off_runtime("pool", "localhost:https").await.unwrap();
        assert_eq!(resolved, addr::resolve("pool", "localhost:https").unwrap());
        ticker.await.unwrap();

        assert!(matches!(
            resolve_off_runtime("pool9", "localhost:1").await,
            Err(Error::UnsupportedNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_input_before_opening() {
        let driver = MemoryDriver::new();
        let endpoint = Endpoint::with_opener(driver.clone());

        assert!(matches!(
            endpoint.dial("tcp", "10.0.0.1:9253").await,
            Err(Error::UnsupportedNetwork(_))
        ));
        assert!(matches!(
            endpoint.dial("pool", "10.0.0.1").await,
            Err(Error::InvalidAddress { .. })
        ));
        assert_eq!(driver.calls(), 0);
    }

    #[tokio::test]
    async fn test_dial_timeout_expires() {
        let driver = MemoryDriver::new();
        driver.set_connect_delay(Duration::from_millis(300));
        let endpoint = Endpoint::with_opener(driver.clone());

        let start = Instant::now();
        let result = endpoint
            .dial_timeout("pool", "10.0.0.1:9253", Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_configured_dial_timeout_applies() {
        let driver = MemoryDriver::new();
        driver.set_connect_delay(Duration::from_millis(300));
        let endpoint = Endpoint::builder()
            .opener(driver.clone())
            .dial_timeout(Duration::from_millis(20))
            .build();

        assert!(matches!(
            endpoint.dial("pool", "10.0.0.1:9253").await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_dial_errors_are_mapped() {
        let driver = MemoryDriver::new();
        let endpoint = Endpoint::with_opener(driver.clone());

        driver.refuse("10.0.0.2:9253".parse().unwrap());
        assert!(matches!(
            endpoint.dial("pool", "10.0.0.2:9253").await,
            Err(Error::AuthenticationFailed)
        ));

        driver.mark_unreachable("10.0.0.3:9253".parse().unwrap());
        assert!(matches!(
            endpoint.dial("pool", "10.0.0.3:9253").await,
            Err(Error::NetworkUnreachable)
        ));

        driver.set_capacity(0);
        assert!(matches!(
            endpoint.dial("pool", "10.0.0.4:9253").await,
            Err(Error::SessionTableFull)
        ));

        driver.set_available(false);
        assert!(matches!(
            endpoint.dial("pool", "10.0.0.4:9253").await,
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[cfg(feature = "server")]
    #[tokio::test]
    async fn test_listen_port_shorthand() {
        let driver = MemoryDriver::new();
        let endpoint = Endpoint::with_opener(driver.clone());

        let listener = endpoint.listen("pool", ":9253").unwrap();
        assert!(listener.local_addr().ip().is_unspecified());
        assert_eq!(listener.local_addr().port(), 9253);
        assert_eq!(driver.listening(), Some(9253));
    }
}
