//! beanstalkd client for the tubeset endpoint.
//!
//! This crate implements the client side of the beanstalkd text protocol for
//! the commands a tube-set consumer needs: `watch`/`ignore` when connecting,
//! then `reserve-with-timeout`, `stats-job`, `use` and `delete`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tubeset_beanstalkd::BeanstalkConnector;
//! use tubeset_core::{EndpointConfig, TubesetEndpoint};
//!
//! #[tokio::main]
//! async fn main() -> tubeset_core::Result<()> {
//!     let config = EndpointConfig::builder().server("127.0.0.1:11300").tubes(["orders"]).build();
//!     let endpoint = TubesetEndpoint::init(BeanstalkConnector::new(), config).await?;
//!     endpoint.start().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tubeset_core::{
    Connector, JobStats, QueueConnection, ReservedJob, Result, TubesetError, DEFAULT_TUBE,
};

/// Slack added on top of the server-side reservation timeout before the
/// client gives up waiting for a reply.
const DEFAULT_REPLY_GRACE: Duration = Duration::from_secs(5);

/// Timeout for replies to commands that do not block server-side.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest body accepted from the server, matching beanstalkd's default
/// `max-job-size`.
pub const DEFAULT_MAX_JOB_SIZE: usize = 65_535;

/// Dials beanstalkd over TCP.
#[derive(Debug, Clone)]
pub struct BeanstalkConnector {
    reply_grace: Duration,
    command_timeout: Duration,
    max_job_size: usize,
}

impl Default for BeanstalkConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BeanstalkConnector {
    /// Create a connector with default timeouts.
    pub fn new() -> Self {
        Self {
            reply_grace: DEFAULT_REPLY_GRACE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_job_size: DEFAULT_MAX_JOB_SIZE,
        }
    }

    /// Set the slack allowed past a reservation timeout.
    pub fn reply_grace(mut self, grace: Duration) -> Self {
        self.reply_grace = grace;
        self
    }

    /// Set the reply timeout for non-blocking commands.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the largest job or stats body accepted from the server.
    ///
    /// Should match the server's `-z` setting.
    pub fn max_job_size(mut self, bytes: usize) -> Self {
        self.max_job_size = bytes;
        self
    }
}

#[async_trait]
impl Connector for BeanstalkConnector {
    type Connection = BeanstalkConnection;

    async fn connect(&self, server: &str, tubes: &[String]) -> Result<BeanstalkConnection> {
        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| TubesetError::Connect(format!("{}: {}", server, e)))?;
        stream.set_nodelay(true).ok();

        let mut conn = BeanstalkConnection {
            stream: BufStream::new(stream),
            tube: DEFAULT_TUBE.to_string(),
            reply_grace: self.reply_grace,
            command_timeout: self.command_timeout,
            max_job_size: self.max_job_size,
            closed: false,
        };
        conn.watch_only(tubes)
            .await
            .map_err(|e| TubesetError::Connect(format!("{}: {}", server, e)))?;

        tracing::debug!(server = %server, tubes = ?tubes, "beanstalkd connection ready");
        Ok(conn)
    }
}

/// An open beanstalkd connection.
///
/// Once a reply is late or malformed the connection refuses further
/// commands, since the next reply read could belong to an earlier command.
#[derive(Debug)]
pub struct BeanstalkConnection {
    stream: BufStream<TcpStream>,
    tube: String,
    reply_grace: Duration,
    command_timeout: Duration,
    max_job_size: usize,
    closed: bool,
}

impl BeanstalkConnection {
    /// Watch `tubes` and stop watching `default` unless it is listed.
    async fn watch_only(&mut self, tubes: &[String]) -> Result<()> {
        for tube in tubes {
            let reply = self.command(&format!("watch {}", tube)).await?;
            if !reply.starts_with("WATCHING ") {
                return Err(TubesetError::Protocol(format!("watch {}: {}", tube, reply)));
            }
        }
        if !tubes.iter().any(|t| t == DEFAULT_TUBE) {
            let reply = self.command(&format!("ignore {}", DEFAULT_TUBE)).await?;
            if !reply.starts_with("WATCHING ") {
                return Err(TubesetError::Protocol(format!("ignore {}: {}", DEFAULT_TUBE, reply)));
            }
        }
        Ok(())
    }

    /// Send one command line and read the reply line.
    async fn command(&mut self, line: &str) -> Result<String> {
        let timeout = self.command_timeout;
        self.command_within(line, timeout).await
    }

    async fn command_within(&mut self, line: &str, timeout: Duration) -> Result<String> {
        if self.closed {
            return Err(TubesetError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;

        match tokio::time::timeout(timeout, self.read_line()).await {
            Ok(reply) => reply,
            Err(_) => {
                self.closed = true;
                Err(TubesetError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no reply to {:?} within {:?}", line, timeout),
                )))
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await?;
        if n == 0 {
            return Err(TubesetError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read a `<len>`-byte body followed by `\r\n`.
    async fn read_body(&mut self, len: usize) -> Result<Vec<u8>> {
        let framed = match len.checked_add(2) {
            Some(framed) if len <= self.max_job_size => framed,
            _ => {
                self.closed = true;
                return Err(TubesetError::Protocol(format!(
                    "body of {} bytes exceeds limit of {}",
                    len, self.max_job_size
                )));
            }
        };

        let mut body = vec![0u8; framed];
        let timeout = self.command_timeout;
        match tokio::time::timeout(timeout, self.stream.read_exact(&mut body)).await {
            Ok(read) => {
                read?;
            }
            Err(_) => {
                self.closed = true;
                return Err(TubesetError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("body of {} bytes not received within {:?}", len, timeout),
                )));
            }
        }
        if !body.ends_with(b"\r\n") {
            self.closed = true;
            return Err(TubesetError::Protocol("body not terminated by CRLF".to_string()));
        }
        body.truncate(len);
        Ok(body)
    }
}

#[async_trait]
impl QueueConnection for BeanstalkConnection {
    async fn reserve(&mut self, timeout: Duration) -> Result<ReservedJob> {
        let line = format!("reserve-with-timeout {}", timeout.as_secs());
        let wait = timeout + self.reply_grace;
        let reply = self.command_within(&line, wait).await?;

        let mut parts = reply.split_whitespace();
        match parts.next() {
            Some("RESERVED") => {
                let (id, len) = parse_id_len(parts.next(), parts.next(), &reply)?;
                let body = self.read_body(len).await?;
                Ok(ReservedJob { id, body })
            }
            Some("TIMED_OUT") => Err(TubesetError::ReserveTimeout),
            _ => Err(TubesetError::Reserve(reply)),
        }
    }

    async fn stats_job(&mut self, id: u64) -> Result<JobStats> {
        let reply = self.command(&format!("stats-job {}", id)).await?;

        let mut parts = reply.split_whitespace();
        match parts.next() {
            Some("OK") => {
                let len = parts
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| TubesetError::Protocol(format!("bad reply {:?}", reply)))?;
                let body = self.read_body(len).await?;
                Ok(parse_stats(&String::from_utf8_lossy(&body)))
            }
            _ => Err(TubesetError::Stats(reply)),
        }
    }

    async fn use_tube(&mut self, tube: &str) -> Result<()> {
        let reply = self.command(&format!("use {}", tube)).await?;
        match reply.strip_prefix("USING ") {
            Some(name) if name == tube => {
                self.tube = tube.to_string();
                Ok(())
            }
            _ => Err(TubesetError::UseTube(reply)),
        }
    }

    fn current_tube(&self) -> &str {
        &self.tube
    }

    async fn delete(&mut self, id: u64) -> Result<()> {
        let reply = self.command(&format!("delete {}", id)).await?;
        if reply == "DELETED" {
            Ok(())
        } else {
            Err(TubesetError::Delete(reply))
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.write_all(b"quit\r\n").await?;
        self.stream.flush().await?;
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

fn parse_id_len(id: Option<&str>, len: Option<&str>, reply: &str) -> Result<(u64, usize)> {
    let id = id.and_then(|s| s.parse::<u64>().ok());
    let len = len.and_then(|s| s.parse::<usize>().ok());
    match (id, len) {
        (Some(id), Some(len)) => Ok((id, len)),
        _ => Err(TubesetError::Protocol(format!("bad reply {:?}", reply))),
    }
}

/// Parse the flat YAML mapping returned by `stats-job`.
pub fn parse_stats(yaml: &str) -> JobStats {
    yaml.lines()
        .filter(|line| !line.trim().is_empty() && line.trim() != "---")
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tubeset_core::{EndpointConfig, Exchange, Router, TubesetEndpoint};

    /// Serve one connection, answering each command line with the next
    /// scripted reply. Returns the commands received.
    async fn fake_server(replies: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<String>>) {
        scripted_server(replies.into_iter().map(|r| (Duration::ZERO, r)).collect()).await
    }

    /// Like `fake_server`, but each reply is sent after its delay.
    async fn scripted_server(replies: Vec<(Duration, Vec<u8>)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut seen = Vec::new();
            for (delay, reply) in replies {
                let mut line = String::new();
                if socket.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                seen.push(line.trim_end().to_string());
                tokio::time::sleep(delay).await;
                if socket.get_mut().write_all(&reply).await.is_err() {
                    break;
                }
            }
            seen
        });
        (addr, handle)
    }

    fn tubes(names: &[&str]) -> Vec<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    fn stats_reply(yaml: &str) -> Vec<u8> {
        format!("OK {}\r\n{}\r\n", yaml.len(), yaml).into_bytes()
    }

    #[test]
    fn test_parse_stats() {
        let stats = parse_stats("---\nid: 7\ntube: orders\nstate: reserved\npri: 1024\nage: 0\n");
        assert_eq!(stats.get("id").map(String::as_str), Some("7"));
        assert_eq!(stats.get("tube").map(String::as_str), Some("orders"));
        assert_eq!(stats.get("age").map(String::as_str), Some("0"));
        assert_eq!(stats.len(), 5);
    }

    #[test]
    fn test_parse_stats_quoted_and_blank() {
        let stats = parse_stats("---\n\ntube: \"orders\"\nnot a pair\n");
        assert_eq!(stats.get("tube").map(String::as_str), Some("orders"));
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn test_parse_id_len() {
        assert_eq!(parse_id_len(Some("7"), Some("8"), "").unwrap(), (7, 8));
        assert!(parse_id_len(Some("x"), Some("8"), "").is_err());
        assert!(parse_id_len(Some("7"), None, "").is_err());
    }

    #[tokio::test]
    async fn test_connect_watches_and_ignores_default() {
        let (addr, server) = fake_server(vec![
            b"WATCHING 2\r\n".to_vec(),
            b"WATCHING 3\r\n".to_vec(),
            b"WATCHING 2\r\n".to_vec(),
        ])
        .await;

        let conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["orders", "refunds"]))
            .await
            .unwrap();
        assert_eq!(conn.current_tube(), "default");
        drop(conn);

        assert_eq!(
            server.await.unwrap(),
            vec!["watch orders", "watch refunds", "ignore default"]
        );
    }

    #[tokio::test]
    async fn test_connect_keeps_default_when_listed() {
        let (addr, server) = fake_server(vec![b"WATCHING 1\r\n".to_vec()]).await;

        let conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();
        drop(conn);

        assert_eq!(server.await.unwrap(), vec!["watch default"]);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["orders"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TubesetError::Connect(_)));
    }

    #[tokio::test]
    async fn test_reserve_stats_use_delete() {
        let yaml = "---\nid: 7\ntube: orders\nstate: reserved\nage: 0\n";
        let (addr, server) = fake_server(vec![
            b"WATCHING 2\r\n".to_vec(),
            b"WATCHING 1\r\n".to_vec(),
            b"RESERVED 7 8\r\norder-42\r\n".to_vec(),
            stats_reply(yaml),
            b"USING orders\r\n".to_vec(),
            b"DELETED\r\n".to_vec(),
        ])
        .await;

        let mut conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["orders"]))
            .await
            .unwrap();

        let job = conn.reserve(Duration::from_secs(2)).await.unwrap();
        assert_eq!(job.id, 7);
        assert_eq!(job.body, b"order-42");

        let stats = conn.stats_job(7).await.unwrap();
        assert_eq!(stats.get("tube").map(String::as_str), Some("orders"));

        conn.use_tube("orders").await.unwrap();
        assert_eq!(conn.current_tube(), "orders");
        conn.delete(7).await.unwrap();
        drop(conn);

        assert_eq!(
            server.await.unwrap(),
            vec![
                "watch orders",
                "ignore default",
                "reserve-with-timeout 2",
                "stats-job 7",
                "use orders",
                "delete 7",
            ]
        );
    }

    #[tokio::test]
    async fn test_reserve_timed_out() {
        let (addr, _server) = fake_server(vec![
            b"WATCHING 1\r\n".to_vec(),
            b"TIMED_OUT\r\n".to_vec(),
        ])
        .await;
        let mut conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_reserve_deadline_soon_is_an_error() {
        let (addr, _server) = fake_server(vec![
            b"WATCHING 1\r\n".to_vec(),
            b"DEADLINE_SOON\r\n".to_vec(),
        ])
        .await;
        let mut conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TubesetError::Reserve(ref r) if r == "DEADLINE_SOON"));
    }

    #[tokio::test]
    async fn test_error_replies_map_to_step() {
        let (addr, _server) = fake_server(vec![
            b"WATCHING 1\r\n".to_vec(),
            b"NOT_FOUND\r\n".to_vec(),
            b"BAD_FORMAT\r\n".to_vec(),
            b"NOT_FOUND\r\n".to_vec(),
        ])
        .await;
        let mut conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        assert!(matches!(conn.stats_job(9).await, Err(TubesetError::Stats(_))));
        assert!(matches!(conn.use_tube("x").await, Err(TubesetError::UseTube(_))));
        assert_eq!(conn.current_tube(), "default");
        assert!(matches!(conn.delete(9).await, Err(TubesetError::Delete(_))));
    }

    #[tokio::test]
    async fn test_server_hangup_is_io_error() {
        let (addr, _server) = fake_server(vec![b"WATCHING 1\r\n".to_vec()]).await;
        let mut conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_close_then_use_fails() {
        let (addr, server) = fake_server(vec![b"WATCHING 1\r\n".to_vec(), Vec::new()]).await;
        let mut conn = BeanstalkConnector::new()
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.delete(1).await.unwrap_err().is_connection_error());
        assert_eq!(server.await.unwrap(), vec!["watch default", "quit"]);
    }

    #[tokio::test]
    async fn test_late_reply_retires_connection() {
        let yaml = "---\nid: 7\ntube: orders\n";
        let (addr, server) = scripted_server(vec![
            (Duration::ZERO, b"WATCHING 1\r\n".to_vec()),
            (Duration::ZERO, b"RESERVED 7 8\r\norder-42\r\n".to_vec()),
            (Duration::ZERO, stats_reply(yaml)),
            (Duration::ZERO, b"USING orders\r\n".to_vec()),
            (Duration::from_millis(300), b"DELETED\r\n".to_vec()),
        ])
        .await;
        let mut conn = BeanstalkConnector::new()
            .command_timeout(Duration::from_millis(100))
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        conn.reserve(Duration::from_secs(1)).await.unwrap();
        conn.stats_job(7).await.unwrap();
        conn.use_tube("orders").await.unwrap();
        let err = conn.delete(7).await.unwrap_err();
        assert!(err.is_connection_error());

        // The late DELETED must never be read as the reply to a later command.
        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_connection_error());

        let seen = server.await.unwrap();
        assert_eq!(seen.last().map(String::as_str), Some("delete 7"));
        drop(conn);
    }

    struct Counting(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl Router for Counting {
        fn id(&self) -> &str {
            "counting"
        }

        async fn process(&self, _exchange: &mut Exchange) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_endpoint_drops_connection_after_late_delete() {
        let yaml = "---\nid: 7\ntube: orders\n";
        let (addr, _server) = scripted_server(vec![
            (Duration::ZERO, b"WATCHING 2\r\n".to_vec()),
            (Duration::ZERO, b"WATCHING 1\r\n".to_vec()),
            (Duration::ZERO, b"RESERVED 7 8\r\norder-42\r\n".to_vec()),
            (Duration::ZERO, stats_reply(yaml)),
            (Duration::ZERO, b"USING orders\r\n".to_vec()),
            (Duration::from_millis(300), b"DELETED\r\n".to_vec()),
        ])
        .await;
        let connector = BeanstalkConnector::new().command_timeout(Duration::from_millis(100));
        let config = EndpointConfig::builder()
            .server(addr)
            .tubes(["orders"])
            .timeout("1s")
            .build();
        let endpoint = TubesetEndpoint::init(connector, config).await.unwrap();
        let router = Arc::new(Counting(std::sync::atomic::AtomicUsize::new(0)));
        endpoint.add_router(router.clone()).await.unwrap();

        let outcome = endpoint.poll().await;

        assert!(outcome.is_dispatched());
        assert!(!outcome.is_deleted());
        assert!(matches!(outcome.error(), Some(TubesetError::Io(_))));
        assert_eq!(router.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!endpoint.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (addr, server) = fake_server(vec![
            b"WATCHING 1\r\n".to_vec(),
            b"RESERVED 7 8\r\norder-42\r\n".to_vec(),
        ])
        .await;
        let mut conn = BeanstalkConnector::new()
            .max_job_size(4)
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TubesetError::Protocol(_)));
        assert!(conn.delete(7).await.unwrap_err().is_connection_error());
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_body_length_overflow_rejected() {
        let header = format!("RESERVED 7 {}\r\n", usize::MAX);
        let (addr, _server) = fake_server(vec![b"WATCHING 1\r\n".to_vec(), header.into_bytes()]).await;
        let mut conn = BeanstalkConnector::new()
            .max_job_size(usize::MAX)
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TubesetError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let (addr, _server) = scripted_server(vec![
            (Duration::ZERO, b"WATCHING 1\r\n".to_vec()),
            (Duration::ZERO, b"RESERVED 7 8\r\nord".to_vec()),
            // Never reached: keeps the socket open while the body stalls.
            (Duration::ZERO, Vec::new()),
        ])
        .await;
        let mut conn = BeanstalkConnector::new()
            .command_timeout(Duration::from_millis(100))
            .connect(&addr, &tubes(&["default"]))
            .await
            .unwrap();

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        match err {
            TubesetError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(conn.stats_job(7).await.unwrap_err().is_connection_error());
    }

    // ========== Integration Tests (require beanstalkd) ==========

    fn beanstalkd_addr() -> String {
        std::env::var("BEANSTALKD_ADDR").unwrap_or_else(|_| "127.0.0.1:11300".to_string())
    }

    #[tokio::test]
    #[ignore = "requires running beanstalkd"]
    async fn test_empty_tube_times_out() {
        let tube = format!("tubeset-test-{}", std::process::id());
        let mut conn = BeanstalkConnector::new()
            .connect(&beanstalkd_addr(), &[tube])
            .await
            .expect("Failed to connect to beanstalkd");

        let err = conn.reserve(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_timeout());
        conn.close().await.unwrap();
    }
}
