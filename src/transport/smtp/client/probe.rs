use std::{
    io::{BufRead, BufReader, Write},
    time::Duration,
};

use super::{net::NetworkStream, tls::TlsParameters};
use crate::transport::smtp::Deadline;

/// Upper bound for each step of the probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Guesses whether `host:port` expects TLS from the first byte
///
/// Runs a handshake that accepts any certificate, writes an HTTP request
/// and waits for one line back. A port speaking TLS answers (an SMTPS server
/// sends its greeting), anything else fails somewhere on the way. Every
/// failure, including a dial error or a fired `deadline`, reads as "not
/// TLS". This is a heuristic: prefer an explicit [`TlsMode`](super::TlsMode)
/// when the convention of the port is known.
pub fn probe_tls(host: &str, port: u16, deadline: &Deadline) -> bool {
    let direct = try_probe(host, port, deadline).is_some();
    #[cfg(feature = "tracing")]
    tracing::debug!("tls probe of {host}:{port}: direct tls {direct}");
    direct
}

fn try_probe(host: &str, port: u16, deadline: &Deadline) -> Option<()> {
    deadline.check().ok()?;
    let params = TlsParameters::insecure(host).ok()?;

    let stream = NetworkStream::connect(host, port, deadline.cap(PROBE_TIMEOUT), None).ok()?;
    let mut stream = BufReader::new(stream);
    let timeout = Some(deadline.cap(PROBE_TIMEOUT).max(Duration::from_millis(1)));
    stream.get_mut().set_read_timeout(timeout).ok()?;
    stream.get_mut().set_write_timeout(timeout).ok()?;

    deadline.check().ok()?;
    stream.get_mut().upgrade_tls(&params).ok()?;
    stream.get_mut().write_all(b"GET / HTTP/1.0\r\n\r\n").ok()?;
    stream.get_mut().flush().ok()?;

    let mut line = Vec::new();
    let read = stream.read_until(b'\n', &mut line).ok()?;
    let _ = stream.get_mut().shutdown(std::net::Shutdown::Both);
    (read > 0 && line.ends_with(b"\n")).then_some(())
}
