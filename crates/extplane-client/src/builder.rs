//! ExtPlaneBuilder -- fluent builder for constructing [`ExtPlaneClient`]
//! instances.
//!
//! Separates configuration from construction so that callers can set up
//! network parameters and timeouts before the first connection attempt.
//!
//! # Example
//!
//! ```no_run
//! use extplane_client::ExtPlaneBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> extplane_core::Result<()> {
//! let client = ExtPlaneBuilder::new()
//!     .host("192.168.1.20")
//!     .connect_timeout(Duration::from_secs(2))
//!     .build_and_start()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use extplane_core::error::{Error, Result};

use crate::client::{ClientOptions, ExtPlaneClient};
use crate::codec::DEFAULT_PORT;

/// Fluent builder for [`ExtPlaneClient`].
///
/// Everything except the host has a default:
///
/// ```ignore
/// let client = ExtPlaneBuilder::new().host("127.0.0.1").build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ExtPlaneBuilder {
    host: Option<String>,
    port: u16,
    options: ClientOptions,
}

impl ExtPlaneBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        ExtPlaneBuilder {
            host: None,
            port: DEFAULT_PORT,
            options: ClientOptions::default(),
        }
    }

    /// Set the simulator's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the ExtPlane TCP port (default: 51000).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout used by `start()` (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Set how long `stop()` waits for each loop (default: 2s).
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.options.stop_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY` (default: enabled).
    pub fn nodelay(mut self, enable: bool) -> Self {
        self.options.nodelay = enable;
        self
    }

    /// Set the connection event channel capacity (default: 64).
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    /// Build the client without connecting.
    ///
    /// Requires that [`host()`](Self::host) has been called.
    pub fn build(self) -> Result<ExtPlaneClient> {
        let host = self.host.ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;
        if host.trim().is_empty() {
            return Err(Error::InvalidParameter("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidParameter("port must not be 0".into()));
        }
        Ok(ExtPlaneClient::with_options(host, self.port, self.options))
    }

    /// Build the client and call `start()` on it.
    pub async fn build_and_start(self) -> Result<ExtPlaneClient> {
        let client = self.build()?;
        client.start().await?;
        Ok(client)
    }
}

impl Default for ExtPlaneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use extplane_test_harness::MockExtPlaneServer;

    #[test]
    fn test_builder_defaults() {
        let builder = ExtPlaneBuilder::new();
        assert_eq!(builder.port, 51000);
        assert!(builder.host.is_none());
        assert_eq!(builder.options.connect_timeout, Duration::from_secs(5));
        assert_eq!(builder.options.stop_timeout, Duration::from_secs(2));
        assert!(builder.options.nodelay);
        assert_eq!(builder.options.event_capacity, 64);
    }

    #[test]
    fn test_builder_custom_settings() {
        let client = ExtPlaneBuilder::new()
            .host("10.0.0.42")
            .port(52000)
            .connect_timeout(Duration::from_millis(750))
            .stop_timeout(Duration::from_millis(100))
            .nodelay(false)
            .event_channel_capacity(8)
            .build()
            .unwrap();

        assert_eq!(client.addr(), "10.0.0.42:52000");
        let options = client.options();
        assert_eq!(options.connect_timeout, Duration::from_millis(750));
        assert_eq!(options.stop_timeout, Duration::from_millis(100));
        assert!(!options.nodelay);
        assert_eq!(options.event_capacity, 8);
    }

    #[test]
    fn test_builder_requires_host() {
        match ExtPlaneBuilder::new().build() {
            Err(Error::InvalidParameter(msg)) => {
                assert!(msg.contains("host"), "expected 'host' in error: {msg}");
            }
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_rejects_port_zero() {
        let result = ExtPlaneBuilder::new().host("127.0.0.1").port(0).build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_client_builder_shortcut() {
        let client = ExtPlaneClient::builder().host("sim.local").build().unwrap();
        assert_eq!(client.host(), "sim.local");
        assert_eq!(client.port(), DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_build_and_start_connects() {
        let server = MockExtPlaneServer::start().await.unwrap();
        let client = ExtPlaneBuilder::new()
            .host(&server.host())
            .port(server.port())
            .build_and_start()
            .await
            .unwrap();

        assert!(client.is_running());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_build_and_start_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ExtPlaneBuilder::new()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout(Duration::from_secs(1))
            .build_and_start()
            .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
