use std::{
    fmt::{self, Debug, Formatter},
    io::{self, Read, Write},
    mem,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use rustls::{ClientConnection, StreamOwned};

use super::tls::TlsParameters;
use crate::{error, Error};

/// A network stream
pub struct NetworkStream {
    inner: InnerNetworkStream,
}

/// Represents the different types of underlying network streams
// usually only one TLS backend at a time is going to be enabled,
// so clippy::large_enum_variant doesn't make sense here
#[allow(clippy::large_enum_variant)]
enum InnerNetworkStream {
    /// Plain TCP stream
    Tcp(TcpStream),
    /// Encrypted TCP stream
    Rustls(Box<StreamOwned<ClientConnection, TcpStream>>),
    /// Can't be built
    None,
}

impl Debug for NetworkStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match self.inner {
            InnerNetworkStream::Tcp(_) => "Tcp",
            InnerNetworkStream::Rustls(_) => "Rustls",
            InnerNetworkStream::None => "None",
        };
        f.debug_tuple("NetworkStream").field(&state).finish()
    }
}

impl NetworkStream {
    fn new(inner: InnerNetworkStream) -> Self {
        if let InnerNetworkStream::None = inner {
            debug_assert!(false, "InnerNetworkStream::None must never be built");
        }

        NetworkStream { inner }
    }

    /// Returns peer's address
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self.inner {
            InnerNetworkStream::Tcp(ref s) => s.peer_addr(),
            InnerNetworkStream::Rustls(ref s) => s.get_ref().peer_addr(),
            InnerNetworkStream::None => Err(closed()),
        }
    }

    /// Shutdowns the connection
    pub fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        match self.inner {
            InnerNetworkStream::Tcp(ref s) => s.shutdown(how),
            InnerNetworkStream::Rustls(ref s) => s.get_ref().shutdown(how),
            InnerNetworkStream::None => Ok(()),
        }
    }

    /// Opens a TCP connection to `host:port`, trying each resolved address
    ///
    /// `connect_timeout` bounds each attempt. With `tls_parameters` the
    /// handshake is completed before returning.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        tls_parameters: Option<&TlsParameters>,
    ) -> Result<NetworkStream, Error> {
        let addrs = (host, port).to_socket_addrs().map_err(error::dial)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(tcp_stream) => {
                    let mut stream = NetworkStream::new(InnerNetworkStream::Tcp(tcp_stream));
                    if let Some(tls_parameters) = tls_parameters {
                        // the handshake shares the connect budget
                        stream
                            .set_read_timeout(Some(connect_timeout))
                            .map_err(error::dial)?;
                        stream
                            .set_write_timeout(Some(connect_timeout))
                            .map_err(error::dial)?;
                        stream.upgrade_tls(tls_parameters)?;
                    }
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(err) => error::dial(err),
            None => error::dial(format!("could not resolve {host}:{port}")),
        })
    }

    /// Wraps the socket with rustls and runs the handshake
    ///
    /// A stream that is already encrypted is left untouched.
    pub fn upgrade_tls(&mut self, tls_parameters: &TlsParameters) -> Result<(), Error> {
        match mem::replace(&mut self.inner, InnerNetworkStream::None) {
            InnerNetworkStream::Tcp(mut tcp_stream) => {
                let mut connection = ClientConnection::new(
                    tls_parameters.connector.clone(),
                    tls_parameters.server_name.inner(),
                )
                .map_err(error::tls)?;
                while connection.is_handshaking() {
                    connection
                        .complete_io(&mut tcp_stream)
                        .map_err(error::tls)?;
                }
                self.inner = InnerNetworkStream::Rustls(Box::new(StreamOwned::new(
                    connection, tcp_stream,
                )));
                Ok(())
            }
            encrypted @ InnerNetworkStream::Rustls(_) => {
                self.inner = encrypted;
                Ok(())
            }
            InnerNetworkStream::None => Err(error::network(closed())),
        }
    }

    /// Tells if the stream is encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self.inner, InnerNetworkStream::Rustls(_))
    }

    /// Set read timeout for IO calls
    pub fn set_read_timeout(&mut self, duration: Option<Duration>) -> io::Result<()> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut stream) => stream.set_read_timeout(duration),
            InnerNetworkStream::Rustls(ref mut stream) => {
                stream.get_ref().set_read_timeout(duration)
            }
            InnerNetworkStream::None => Ok(()),
        }
    }

    /// Set write timeout for IO calls
    pub fn set_write_timeout(&mut self, duration: Option<Duration>) -> io::Result<()> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut stream) => stream.set_write_timeout(duration),
            InnerNetworkStream::Rustls(ref mut stream) => {
                stream.get_ref().set_write_timeout(duration)
            }
            InnerNetworkStream::None => Ok(()),
        }
    }
}

impl Read for NetworkStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => s.read(buf),
            InnerNetworkStream::Rustls(ref mut s) => s.read(buf),
            InnerNetworkStream::None => Err(closed()),
        }
    }
}

impl Write for NetworkStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => s.write(buf),
            InnerNetworkStream::Rustls(ref mut s) => s.write(buf),
            InnerNetworkStream::None => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => s.flush(),
            InnerNetworkStream::Rustls(ref mut s) => s.flush(),
            InnerNetworkStream::None => Ok(()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream was lost during a TLS upgrade")
}
