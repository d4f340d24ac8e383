//! Reachability checks for remote Kernel Gateways.

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Succeeds when `host:port` accepts a TCP connection within `limit`.
pub async fn probe(host: &str, port: u16, limit: Duration) -> io::Result<()> {
    match tokio::time::timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no answer within {}s", limit.as_secs()),
        )),
    }
}
