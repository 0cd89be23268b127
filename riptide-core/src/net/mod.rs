//! Network seams: blocking client factory and transport handles.
//!
//! Replication traffic is line-oriented during the handshake (AUTH,
//! sync requests) and raw bytes afterwards. Workers own their sockets and
//! block on them; the control loop never touches the network.

use crate::{Error, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A synchronous replication transport
pub trait BlockingClient: Send {
    /// Connect to `host:port` within `timeout`
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()>;

    /// Write one CRLF-terminated line
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read one line, stripping the terminator; `Error::Timeout` on expiry
    fn read_line(&mut self, timeout: Duration) -> Result<String>;

    /// Write raw bytes
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;

    /// Printable remote address, `"???"` when unknown
    fn remote_repr(&self) -> String;
}

/// Factory for replication transports plus session control
pub trait Network: Send + Sync {
    /// Create an unconnected client with `buf_size` read buffering
    fn create_blocking_client(&self, buf_size: usize) -> Box<dyn BlockingClient>;

    /// Best-effort cancellation of a server-side session
    fn cancel_session(&self, session_id: u64) -> Result<()>;
}

/// Real TCP transport over `std::net`
pub struct BlockingTcpClient {
    buf_size: usize,
    stream: Option<TcpStream>,
    reader: Option<BufReader<TcpStream>>,
    remote: Option<String>,
}

impl BlockingTcpClient {
    /// New unconnected client
    pub fn new(buf_size: usize) -> Self {
        Self {
            buf_size,
            stream: None,
            reader: None,
            remote: None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::network("client is not connected"))
    }
}

impl BlockingClient for BlockingTcpClient {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::network(format!("resolve {}:{}: {}", host, port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::network(format!("resolve {}:{}: no address", host, port)));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    let reader =
                        BufReader::with_capacity(self.buf_size.min(1 << 20), stream.try_clone()?);
                    self.remote = Some(addr.to_string());
                    self.reader = Some(reader);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::network(format!(
            "connect {}:{} failed: {}",
            host,
            port,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::network("client is not connected"))?;
        reader.get_ref().set_read_timeout(Some(timeout))?;

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => Err(Error::network("connection closed by peer")),
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(line)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(Error::timeout("read line"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(buf)?;
        Ok(())
    }

    fn remote_repr(&self) -> String {
        self.remote.clone().unwrap_or_else(|| "???".to_string())
    }
}

/// Network factory producing real TCP clients.
///
/// Session cancellation is owned by the server's session table; a bare
/// factory has nothing to cancel and only logs the request.
pub struct TcpNetwork;

impl Network for TcpNetwork {
    fn create_blocking_client(&self, buf_size: usize) -> Box<dyn BlockingClient> {
        Box::new(BlockingTcpClient::new(buf_size))
    }

    fn cancel_session(&self, session_id: u64) -> Result<()> {
        tracing::debug!("cancel_session {} ignored by bare TcpNetwork", session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_line_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(sock.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line.trim_end(), "AUTH hunter2");
            sock.write_all(b"+OK\r\n").unwrap();
        });

        let mut client = BlockingTcpClient::new(64 * 1024);
        client
            .connect("127.0.0.1", addr.port(), Duration::from_secs(1))
            .unwrap();
        client.write_line("AUTH hunter2").unwrap();
        let reply = client.read_line(Duration::from_secs(1)).unwrap();
        assert_eq!(reply, "+OK");
        server.join().unwrap();
    }

    #[test]
    fn test_read_line_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _keep = std::thread::spawn(move || {
            let _sock = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });

        let mut client = BlockingTcpClient::new(4096);
        client
            .connect("127.0.0.1", addr.port(), Duration::from_secs(1))
            .unwrap();
        let err = client.read_line(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_unconnected_client_errors() {
        let mut client = BlockingTcpClient::new(4096);
        assert!(client.write_line("hi").is_err());
        assert_eq!(client.remote_repr(), "???");
    }

    #[test]
    fn test_connect_refused() {
        let mut client = BlockingTcpClient::new(4096);
        // port 1 is essentially never listening
        let res = client.connect("127.0.0.1", 1, Duration::from_millis(200));
        assert!(res.is_err());
    }
}
