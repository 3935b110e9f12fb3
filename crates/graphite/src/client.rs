//! Graphite plaintext protocol client.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info};

use crate::error::{GraphiteError, Result};
use crate::metric::Metric;

/// How long a TCP dial may take before it is abandoned.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport used to reach Graphite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    /// One batched write per `send_metrics` call.
    #[default]
    Tcp,
    /// One datagram per metric.
    Udp,
    /// Log metrics instead of sending them.
    Nop,
}

impl Protocol {
    /// Parses `tcp`, `udp` or `nop`.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
            .map_err(|_| GraphiteError::unsupported_protocol(s))
    }
}

/// Connection settings for a [`Graphite`] client.
#[derive(Debug, Clone)]
pub struct GraphiteConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Prepended to every metric name as `prefix.name`.
    pub prefix: Option<String>,
    /// TCP dial timeout.
    pub timeout: Duration,
    /// Silence the per-metric log lines of the nop protocol.
    pub disable_log: bool,
}

impl GraphiteConfig {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            prefix: None,
            timeout: DEFAULT_TIMEOUT,
            disable_log: false,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_disable_log(mut self, disable_log: bool) -> Self {
        self.disable_log = disable_log;
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Destination for metric batches.
///
/// Implemented by [`Graphite`]; the seam lets delivery and worker code run
/// against any transport.
#[async_trait]
pub trait MetricSink: Send {
    /// (Re)establishes the underlying connection, closing any previous one.
    async fn connect(&mut self) -> Result<()>;

    /// Sends a batch and returns how many metrics went out.
    async fn send_metrics(&mut self, metrics: &[Metric]) -> Result<usize>;
}

#[derive(Debug)]
enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// A Graphite endpoint and its live connection, if any.
#[derive(Debug)]
pub struct Graphite {
    config: GraphiteConfig,
    conn: Option<Connection>,
}

impl Graphite {
    /// Creates a client without connecting.
    pub fn new(config: GraphiteConfig) -> Self {
        Self { config, conn: None }
    }

    /// Creates a client and connects it.
    pub async fn connect_new(config: GraphiteConfig) -> Result<Self> {
        let mut graphite = Self::new(config);
        graphite.connect().await?;
        Ok(graphite)
    }

    /// A client that only logs what it would send.
    pub fn nop(host: impl Into<String>, port: u16) -> Self {
        Self::new(GraphiteConfig::new(Protocol::Nop, host, port))
    }

    pub fn config(&self) -> &GraphiteConfig {
        &self.config
    }

    pub fn is_nop(&self) -> bool {
        self.config.protocol == Protocol::Nop
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens a fresh connection, closing the current one first.
    ///
    /// The nop protocol never opens anything.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_nop() {
            return Ok(());
        }
        if let Err(e) = self.disconnect().await {
            debug!(error = %e, "Error while closing previous Graphite connection");
        }

        let address = self.config.address();

        let conn = match self.config.protocol {
            Protocol::Tcp => {
                // Lookup and dial share one deadline.
                let dial = async {
                    let targets = self.resolve(&address).await?;
                    dial_tcp(&targets, &address).await
                };
                let stream = tokio::time::timeout(self.config.timeout, dial)
                    .await
                    .map_err(|_| GraphiteError::ConnectTimeout {
                        address: address.clone(),
                        timeout: self.config.timeout,
                    })??;
                Connection::Tcp(stream)
            }
            Protocol::Udp => {
                let targets = self.resolve(&address).await?;
                let target = *targets.first().ok_or_else(|| GraphiteError::NoAddress {
                    address: address.clone(),
                })?;
                let local: SocketAddr = if target.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket
                    .connect(target)
                    .await
                    .map_err(|source| GraphiteError::Connect {
                        address: address.clone(),
                        source,
                    })?;
                Connection::Udp(socket)
            }
            Protocol::Nop => return Ok(()),
        };

        debug!(address = %address, protocol = %self.config.protocol, "Connected to Graphite");
        self.conn = Some(conn);
        Ok(())
    }

    /// Closes and clears the live connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(Connection::Tcp(mut stream)) => stream.shutdown().await?,
            Some(Connection::Udp(_)) | None => {}
        }
        Ok(())
    }

    /// Resolves the configured host. Never returns an empty list.
    async fn resolve(&self, address: &str) -> Result<Vec<SocketAddr>> {
        let targets: Vec<SocketAddr> =
            tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
                .await
                .map_err(|source| GraphiteError::Resolve {
                    address: address.to_string(),
                    source,
                })?
                .collect();
        if targets.is_empty() {
            return Err(GraphiteError::NoAddress {
                address: address.to_string(),
            });
        }
        Ok(targets)
    }

    /// Renders a metric as one protocol line, or `None` for an uninitialized metric.
    pub fn format_metric(&self, metric: &Metric) -> Option<String> {
        if metric.is_zero() {
            return None;
        }
        Some(render_line(self.config.prefix.as_deref(), metric))
    }

    /// Sends a batch of metrics and returns how many were sent (or logged).
    ///
    /// Uninitialized metrics are skipped and not counted.
    pub async fn send_metrics(&mut self, metrics: &[Metric]) -> Result<usize> {
        if self.is_nop() {
            let valid = metrics.iter().filter(|m| !m.is_zero());
            if self.config.disable_log {
                return Ok(valid.count());
            }
            let mut count = 0;
            for metric in valid {
                info!("Graphite: {metric}");
                count += 1;
            }
            return Ok(count);
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(GraphiteError::NotConnected {
                address: self.config.address(),
            });
        };
        let prefix = self.config.prefix.as_deref();
        let lines = metrics
            .iter()
            .filter(|m| !m.is_zero())
            .map(|m| render_line(prefix, m));

        match conn {
            Connection::Tcp(stream) => {
                let mut buf = String::new();
                let mut count = 0;
                for line in lines {
                    buf.push_str(&line);
                    count += 1;
                }
                if !buf.is_empty() {
                    stream.write_all(buf.as_bytes()).await?;
                }
                Ok(count)
            }
            Connection::Udp(socket) => {
                let mut count = 0;
                for line in lines {
                    // Datagram loss is not detected at this layer.
                    match socket.send(line.as_bytes()).await {
                        Ok(_) => count += 1,
                        Err(e) => debug!(error = %e, "Dropped Graphite datagram"),
                    }
                }
                Ok(count)
            }
        }
    }

    /// Sends a single metric.
    pub async fn send_metric(&mut self, metric: Metric) -> Result<usize> {
        self.send_metrics(std::slice::from_ref(&metric)).await
    }

    /// Sends `stat` with `value` stamped with the current time.
    pub async fn simple_send(&mut self, stat: &str, value: &str) -> Result<usize> {
        let metric = Metric::new(stat, value, chrono::Utc::now().timestamp());
        self.send_metric(metric).await
    }
}

/// Tries each resolved address in order and keeps the first that accepts.
async fn dial_tcp(targets: &[SocketAddr], address: &str) -> Result<TcpStream> {
    TcpStream::connect(targets)
        .await
        .map_err(|source| GraphiteError::Connect {
            address: address.to_string(),
            source,
        })
}

// `[prefix.]name value timestamp\n`, stamping zero timestamps with the current time.
fn render_line(prefix: Option<&str>, metric: &Metric) -> String {
    let timestamp = if metric.timestamp == 0 {
        chrono::Utc::now().timestamp()
    } else {
        metric.timestamp
    };
    match prefix {
        Some(prefix) => format!("{prefix}.{} {} {timestamp}\n", metric.name, metric.value),
        None => format!("{} {} {timestamp}\n", metric.name, metric.value),
    }
}

#[async_trait]
impl MetricSink for Graphite {
    async fn connect(&mut self) -> Result<()> {
        Graphite::connect(self).await
    }

    async fn send_metrics(&mut self, metrics: &[Metric]) -> Result<usize> {
        Graphite::send_metrics(self, metrics).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tracing_subscriber::fmt::MakeWriter;

    fn sample_metrics() -> Vec<Metric> {
        vec![
            Metric::new("test.metric1", "10", 1234567890),
            Metric::default(),
            Metric::new("test.metric2", "20", 1234567890),
        ]
    }

    /// Accepts one connection and returns everything written to it.
    async fn capture_tcp() -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });
        (port, handle)
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn lines_containing(&self, needle: &str) -> usize {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::parse("udp").unwrap(), Protocol::Udp);
        assert_eq!(Protocol::parse("nop").unwrap(), Protocol::Nop);
        assert_eq!(Protocol::Udp.to_string(), "udp");

        let err = Protocol::parse("http").unwrap_err();
        assert!(matches!(err, GraphiteError::UnsupportedProtocol { .. }));
        assert_eq!(
            err.to_string(),
            "Graphite protocol http not supported, use tcp/udp/nop."
        );
        assert!(Protocol::parse("TCP").is_err());
    }

    #[test]
    fn test_is_nop() {
        assert!(Graphite::nop("localhost", 2003).is_nop());
        let tcp = Graphite::new(GraphiteConfig::new(Protocol::Tcp, "localhost", 2003));
        assert!(!tcp.is_nop());
        assert!(!tcp.is_connected());
    }

    #[test]
    fn test_config_address_and_prefix() {
        let config = GraphiteConfig::new(Protocol::Tcp, "::1", 2003).with_prefix("");
        assert_eq!(config.address(), "[::1]:2003");
        assert_eq!(config.prefix, None);

        let config = GraphiteConfig::new(Protocol::Tcp, "127.0.0.1", 2003).with_prefix("dc1");
        assert_eq!(config.address(), "127.0.0.1:2003");
        assert_eq!(config.prefix.as_deref(), Some("dc1"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut graphite = Graphite::new(GraphiteConfig::new(Protocol::Tcp, "127.0.0.1", port));
        let err = graphite.connect().await.unwrap_err();
        assert!(err.is_connect());
        assert!(!graphite.is_connected());

        let mut nop = Graphite::nop("127.0.0.1", port);
        nop.connect().await.unwrap();
        assert!(!nop.is_connected());
    }

    #[tokio::test]
    async fn test_dial_falls_through_to_next_address() {
        let refused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let refused_addr = refused.local_addr().unwrap();
        drop(refused);
        let (port, received) = capture_tcp().await;
        let live: SocketAddr = (Ipv4Addr::LOCALHOST, port).into();

        let mut stream = dial_tcp(&[refused_addr, live], "graphite:2003")
            .await
            .unwrap();
        stream.write_all(b"a.b 1 100\n").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);
        assert_eq!(received.await.unwrap(), "a.b 1 100\n");

        let err = dial_tcp(&[refused_addr], "graphite:2003").await.unwrap_err();
        assert!(matches!(err, GraphiteError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_connect_resolves_hostnames() {
        let (port, received) = capture_tcp().await;
        let mut graphite =
            Graphite::connect_new(GraphiteConfig::new(Protocol::Tcp, "localhost", port))
                .await
                .unwrap();
        assert!(graphite.is_connected());
        graphite.disconnect().await.unwrap();
        assert_eq!(received.await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_disconnect_clears_connection() {
        let (port, received) = capture_tcp().await;
        let mut graphite =
            Graphite::connect_new(GraphiteConfig::new(Protocol::Tcp, "127.0.0.1", port))
                .await
                .unwrap();
        assert!(graphite.is_connected());

        graphite.disconnect().await.unwrap();
        assert!(!graphite.is_connected());
        assert_eq!(received.await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_send_metrics_tcp_batches_valid_lines() {
        let (port, received) = capture_tcp().await;
        let mut graphite =
            Graphite::connect_new(GraphiteConfig::new(Protocol::Tcp, "127.0.0.1", port))
                .await
                .unwrap();

        let sent = graphite.send_metrics(&sample_metrics()).await.unwrap();
        assert_eq!(sent, 2);
        graphite.disconnect().await.unwrap();

        assert_eq!(
            received.await.unwrap(),
            "test.metric1 10 1234567890\ntest.metric2 20 1234567890\n"
        );
    }

    #[tokio::test]
    async fn test_send_metric_with_prefix() {
        let (port, received) = capture_tcp().await;
        let config = GraphiteConfig::new(Protocol::Tcp, "127.0.0.1", port).with_prefix("prefix");
        let mut graphite = Graphite::connect_new(config).await.unwrap();

        graphite
            .send_metric(Metric::new("test.metric", "10", 1234567890))
            .await
            .unwrap();
        graphite.disconnect().await.unwrap();

        assert_eq!(received.await.unwrap(), "prefix.test.metric 10 1234567890\n");
    }

    #[tokio::test]
    async fn test_send_metrics_udp_one_datagram_per_metric() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let mut graphite =
            Graphite::connect_new(GraphiteConfig::new(Protocol::Udp, "127.0.0.1", port))
                .await
                .unwrap();

        let sent = graphite.send_metrics(&sample_metrics()).await.unwrap();
        assert_eq!(sent, 2);

        let mut buf = [0u8; 1024];
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"test.metric1 10 1234567890\n");
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"test.metric2 20 1234567890\n");
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let mut graphite = Graphite::new(GraphiteConfig::new(Protocol::Tcp, "127.0.0.1", 2003));
        let err = graphite.send_metrics(&sample_metrics()).await.unwrap_err();
        assert!(matches!(err, GraphiteError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_nop_logs_one_line_per_valid_metric() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut graphite = Graphite::nop("localhost", 2003);
        let sent = graphite.send_metrics(&sample_metrics()).await.unwrap();

        assert_eq!(sent, 2);
        assert_eq!(logs.lines_containing("Graphite: "), 2);
        assert_eq!(logs.lines_containing("test.metric1 10"), 1);
    }

    #[tokio::test]
    async fn test_nop_with_logging_disabled_is_silent() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let config = GraphiteConfig::new(Protocol::Nop, "localhost", 2003).with_disable_log(true);
        let mut graphite = Graphite::new(config);
        let sent = graphite.send_metrics(&sample_metrics()).await.unwrap();
        graphite.simple_send("test.metric", "10").await.unwrap();

        assert_eq!(sent, 2);
        assert_eq!(logs.lines_containing("Graphite: "), 0);
    }

    #[test]
    fn test_format_metric() {
        let graphite = Graphite::nop("localhost", 2003);
        assert_eq!(graphite.format_metric(&Metric::default()), None);
        assert_eq!(
            graphite.format_metric(&Metric::new("a.b", "1.5", 42)).as_deref(),
            Some("a.b 1.5 42\n")
        );

        let before = chrono::Utc::now().timestamp();
        let line = graphite
            .format_metric(&Metric::new("a.b", "1", 0))
            .unwrap();
        let stamped: i64 = line.trim_end().rsplit(' ').next().unwrap().parse().unwrap();
        assert!(stamped >= before);
    }
}
