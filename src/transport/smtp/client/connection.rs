use std::{
    fmt::Display,
    io::{BufRead, BufReader, Write},
    net::Shutdown,
    time::Duration,
};

#[cfg(feature = "tracing")]
use super::escape_crlf;
use super::{net::NetworkStream, tls::TlsParameters, ClientCodec};
use crate::{
    error,
    message::EncodedMessage,
    transport::smtp::{
        authentication::{select_mechanism, Authenticator, Credentials, ServerContext},
        commands::{Auth, AuthResponse, Data, Ehlo, Mail, Noop, Quit, Rcpt, Starttls},
        extension::{ClientId, Extension, MailBodyParameter, MailParameter, ServerInfo},
        response::{parse_response, Response},
        Deadline,
    },
    Error,
};

/// Fixed connect timeout, lowered by a shorter deadline
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long QUIT may take when closing
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on `334` rounds in one exchange
const MAX_CHALLENGES: usize = 10;

macro_rules! try_smtp (
    ($err: expr, $client: ident) => ({
        match $err {
            Ok(val) => val,
            Err(err) => {
                $client.abort();
                return Err(err)
            },
        }
    })
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Ok,
    /// The server sent something that is not an SMTP reply
    BrokenResponse,
    /// The socket failed or the connection was aborted
    BrokenConnection,
}

/// Structure that implements the SMTP client
pub struct SmtpConnection {
    /// TCP stream between client and server
    stream: BufReader<NetworkStream>,
    state: ConnectionState,
    /// Whether QUIT has been sent
    sent_quit: bool,
    /// Information about the server
    server_info: ServerInfo,
    /// Host name the connection was opened to
    host: String,
    /// Socket timeout for each read and write, before deadline capping
    timeout: Option<Duration>,
    /// Token of the operation in progress
    deadline: Deadline,
    /// Set while credentials are on the wire, to keep them out of the logs
    in_auth: bool,
}

impl SmtpConnection {
    /// Get information about the server
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Host name the connection was opened to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Connects to `host:port` and greets the server
    ///
    /// The TCP connect is bounded by ten seconds, or less when `deadline` is
    /// nearer. With `tls_parameters` the socket is wrapped in TLS before the
    /// greeting is read. Sends EHLO and parses server information.
    pub fn connect(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        hello_name: &ClientId,
        tls_parameters: Option<&TlsParameters>,
        deadline: &Deadline,
    ) -> Result<SmtpConnection, Error> {
        deadline.check()?;
        let stream =
            NetworkStream::connect(host, port, deadline.cap(CONNECT_TIMEOUT), tls_parameters)?;
        #[cfg(feature = "tracing")]
        {
            if tls_parameters.is_some() {
                tracing::debug!("connection encrypted");
            }
        }

        let mut conn = SmtpConnection {
            stream: BufReader::new(stream),
            state: ConnectionState::Ok,
            sent_quit: false,
            server_info: ServerInfo::default(),
            host: host.to_owned(),
            timeout,
            deadline: deadline.clone(),
            in_auth: false,
        };
        try_smtp!(conn.arm(deadline), conn);

        let greeting = try_smtp!(conn.read_response(), conn);
        #[cfg(feature = "tracing")]
        tracing::debug!("greeting: {}", greeting.text());
        #[cfg(not(feature = "tracing"))]
        let _ = greeting;

        try_smtp!(conn.ehlo(hello_name), conn);

        // Print server information
        #[cfg(feature = "tracing")]
        tracing::debug!("server {}", conn.server_info);
        Ok(conn)
    }

    /// Runs the MAIL, RCPT and DATA sequence for an encoded message
    ///
    /// One RCPT is sent per recipient, duplicates included. Any failure
    /// aborts the connection, which is then reported as broken.
    pub fn send(
        &mut self,
        message: &EncodedMessage,
        deadline: &Deadline,
    ) -> Result<Response, Error> {
        try_smtp!(self.arm(deadline), self);

        // Internationalization handling
        //
        // * 8BITMIME: https://tools.ietf.org/html/rfc6152
        // * SMTPUTF8: https://tools.ietf.org/html/rfc6531
        let mut mail_options = vec![];
        if message.requires_smtputf8() {
            if !self.server_info.supports_feature(Extension::SmtpUtfEight) {
                // don't try to send non-ascii addresses (per RFC)
                return Err(error::client(
                    "Envelope contains non-ascii chars but server does not support SMTPUTF8",
                ));
            }
            mail_options.push(MailParameter::SmtpUtfEight);
        }
        if message.is_8bit() && self.server_info.supports_feature(Extension::EightBitMime) {
            mail_options.push(MailParameter::Body(MailBodyParameter::EightBitMime));
        }

        try_smtp!(
            self.command(Mail::new(message.envelope_from().clone(), mail_options)),
            self
        );

        for recipient in message.recipients() {
            try_smtp!(self.command(Rcpt::new(recipient.clone())), self);
        }

        try_smtp!(self.command(Data), self);

        let result = try_smtp!(self.message(&message.formatted()), self);
        Ok(result)
    }

    /// Whether the connection can no longer be used
    pub fn has_broken(&self) -> bool {
        self.sent_quit || self.state != ConnectionState::Ok
    }

    /// STARTTLS is offered and the stream is still plaintext
    pub fn can_starttls(&self) -> bool {
        !self.is_encrypted() && self.server_info.supports_feature(Extension::StartTls)
    }

    /// Upgrades the connection in place, then greets the server again
    ///
    /// A failure aborts the connection.
    pub fn starttls(
        &mut self,
        tls_parameters: &TlsParameters,
        hello_name: &ClientId,
        deadline: &Deadline,
    ) -> Result<(), Error> {
        if !self.server_info.supports_feature(Extension::StartTls) {
            self.abort();
            return Err(error::client("STARTTLS is not supported on this server"));
        }

        try_smtp!(self.arm(deadline), self);
        try_smtp!(self.command(Starttls), self);
        if let Err(err) = self.stream.get_mut().upgrade_tls(tls_parameters) {
            // the socket is in an unknown TLS state, QUIT cannot be sent
            self.state = ConnectionState::BrokenConnection;
            let _ = self.stream.get_mut().shutdown(Shutdown::Both);
            return Err(err);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("connection encrypted");
        try_smtp!(self.arm(deadline), self);
        // Send EHLO again
        try_smtp!(self.ehlo(hello_name), self);
        Ok(())
    }

    /// Send EHLO and update server info
    fn ehlo(&mut self, hello_name: &ClientId) -> Result<(), Error> {
        let ehlo_response = self.command(Ehlo::new(hello_name.clone()))?;
        self.server_info = ServerInfo::from_response(&ehlo_response)?;
        Ok(())
    }

    /// Authenticates with the mechanism picked from the EHLO reply
    ///
    /// CRAM-MD5 is preferred, then NTLM, then PLAIN. When a step fails once
    /// the exchange has started, the exchange is cancelled with `*`. Every
    /// failure closes the connection and is reported with an authentication
    /// error kind; a rejection keeps the server status as its source.
    pub fn auth(
        &mut self,
        credentials: &Credentials,
        workstation: &str,
        deadline: &Deadline,
    ) -> Result<Response, Error> {
        try_smtp!(self.arm(deadline), self);

        let mechanisms = self.server_info.auth_mechanisms();
        let mechanism = select_mechanism(&mechanisms);
        #[cfg(feature = "tracing")]
        tracing::debug!("authenticating with {mechanism}");

        let mut authenticator = try_smtp!(
            Authenticator::new(mechanism, credentials, &self.host, workstation),
            self
        );
        let server = ServerContext {
            name: &self.host,
            tls: self.is_encrypted(),
            mechanisms: &mechanisms,
        };
        let initial_response = try_smtp!(authenticator.start(&server), self);

        self.in_auth = true;
        let result = self.exchange(&mut authenticator, initial_response);
        self.in_auth = false;

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                if !self.has_broken() {
                    // cancel the exchange, whatever the server answers
                    let _ = self.command(AuthResponse::cancel());
                }
                self.abort();
                Err(err)
            }
        }
    }

    fn exchange(
        &mut self,
        authenticator: &mut Authenticator,
        initial_response: Option<Vec<u8>>,
    ) -> Result<Response, Error> {
        let command = Auth::new(
            authenticator.mechanism(),
            initial_response.map(crate::base64::encode),
        );
        let mut response = self.command(command).map_err(rejected)?;

        for _ in 0..MAX_CHALLENGES {
            let text = response.text();
            if response.has_code(334) {
                let answer = authenticator.next(&text, true)?.unwrap_or_default();
                response = self.command(AuthResponse::new(&answer)).map_err(rejected)?;
            } else if response.has_code(235) {
                // the success text is a status line, never base64
                authenticator.next(&text, false)?;
                return Ok(response);
            } else {
                return Err(error::auth(error::code(response.code(), Some(text))));
            }
        }

        Err(error::auth("Unexpected number of challenges"))
    }

    /// Sends QUIT and closes the socket
    pub fn quit(&mut self) -> Result<Response, Error> {
        self.sent_quit = true;
        let result = self
            .arm(&Deadline::after(QUIT_TIMEOUT))
            .and_then(|()| self.command(Quit));
        let _ = self.stream.get_mut().shutdown(Shutdown::Both);
        self.state = ConnectionState::BrokenConnection;
        result
    }

    /// Closes the connection after a failure, sending QUIT if still possible
    pub fn abort(&mut self) {
        // Only try to quit if we are not already broken
        if !self.sent_quit && self.state == ConnectionState::Ok {
            let _ = self.quit();
        }

        if self.state != ConnectionState::BrokenConnection {
            let _ = self.stream.get_mut().shutdown(Shutdown::Both);
        }
        self.sent_quit = true;
        self.state = ConnectionState::BrokenConnection;
    }

    /// Tells if the underlying stream is currently encrypted
    pub fn is_encrypted(&self) -> bool {
        self.stream.get_ref().is_encrypted()
    }

    /// Checks if the server is connected using the NOOP SMTP command
    pub fn test_connected(&mut self, deadline: &Deadline) -> Result<Response, Error> {
        try_smtp!(self.arm(deadline), self);
        Ok(try_smtp!(self.command(Noop), self))
    }

    /// Uses `deadline` for the next commands and caps the socket timeouts
    fn arm(&mut self, deadline: &Deadline) -> Result<(), Error> {
        deadline.check()?;
        self.deadline = deadline.clone();
        let timeout = deadline.cap_timeout(self.timeout);
        let stream = self.stream.get_mut();
        stream.set_read_timeout(timeout).map_err(error::network)?;
        stream.set_write_timeout(timeout).map_err(error::network)
    }

    /// Sends the message content
    fn message(&mut self, message: &[u8]) -> Result<Response, Error> {
        let mut codec = ClientCodec::new();
        let mut out_buf = Vec::with_capacity(message.len());
        codec.encode(message, &mut out_buf);
        self.write(out_buf.as_slice())?;
        self.write(b"\r\n.\r\n")?;

        self.read_response()
    }

    /// Sends an SMTP command
    fn command<C: Display>(&mut self, command: C) -> Result<Response, Error> {
        self.write(command.to_string().as_bytes())?;
        self.read_response()
    }

    /// Writes a string to the server
    fn write(&mut self, string: &[u8]) -> Result<(), Error> {
        if self.state == ConnectionState::BrokenConnection {
            return Err(error::network("connection is closed"));
        }
        self.deadline.check()?;

        let stream = self.stream.get_mut();
        if let Err(err) = stream.write_all(string).and_then(|()| stream.flush()) {
            self.state = ConnectionState::BrokenConnection;
            return Err(error::network(err));
        }

        #[cfg(feature = "tracing")]
        {
            if self.in_auth {
                tracing::debug!("Wrote: <authentication data>");
            } else {
                tracing::debug!("Wrote: {}", escape_crlf(&String::from_utf8_lossy(string)));
            }
        }
        Ok(())
    }

    /// Gets the SMTP response
    ///
    /// A negative reply becomes a protocol error carrying its code and text.
    fn read_response(&mut self) -> Result<Response, Error> {
        let mut buffer = String::with_capacity(100);

        loop {
            self.deadline.check()?;
            match self.stream.read_line(&mut buffer) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    self.state = ConnectionState::BrokenConnection;
                    return Err(error::network(err));
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!("<< {}", escape_crlf(&buffer));
            match parse_response(&buffer) {
                Ok((_remaining, response)) => {
                    return if response.is_positive() {
                        Ok(response)
                    } else {
                        Err(error::code(response.code(), Some(response.text())))
                    };
                }
                Err(nom::Err::Incomplete(_)) => { /* read more */ }
                Err(nom::Err::Failure(e)) | Err(nom::Err::Error(e)) => {
                    self.state = ConnectionState::BrokenResponse;
                    return Err(error::response(e.to_string()));
                }
            }
        }

        self.state = ConnectionState::BrokenConnection;
        Err(error::response("incomplete response"))
    }
}

/// A negative reply during authentication is an authentication failure
fn rejected(err: Error) -> Error {
    if err.is_protocol() {
        error::auth(err)
    } else {
        err
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        thread,
    };

    use pretty_assertions::assert_eq;

    use super::*;

    /// Answers each line with the next scripted reply, returns what it read
    fn serve(replies: &'static [&'static str]) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut writer = socket.try_clone().unwrap();
            let mut reader = BufReader::new(socket);
            writer.write_all(replies[0].as_bytes()).unwrap();

            let mut lines = Vec::new();
            for reply in &replies[1..] {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                lines.push(line.trim_end().to_owned());
                writer.write_all(reply.as_bytes()).unwrap();
            }
            lines
        });
        (port, handle)
    }

    fn connect(port: u16) -> SmtpConnection {
        SmtpConnection::connect(
            "127.0.0.1",
            port,
            Some(Duration::from_secs(5)),
            &ClientId::Domain("client.test".to_owned()),
            None,
            &Deadline::none(),
        )
        .unwrap()
    }

    #[test]
    fn greeting_and_ehlo() {
        let (port, server) = serve(&[
            "220 mx.test ESMTP\r\n",
            "250-mx.test\r\n250-8BITMIME\r\n250 STARTTLS\r\n",
            "221 bye\r\n",
        ]);
        let mut conn = connect(port);
        assert_eq!(conn.server_info().name(), "mx.test");
        assert!(conn.can_starttls());
        assert!(!conn.has_broken());
        assert_eq!(conn.host(), "127.0.0.1");

        conn.quit().unwrap();
        assert!(conn.has_broken());
        assert_eq!(server.join().unwrap(), vec!["EHLO client.test", "QUIT"]);
    }

    #[test]
    fn rejected_greeting() {
        let (port, server) = serve(&["554 go away\r\n", "221 bye\r\n"]);
        let err = SmtpConnection::connect(
            "127.0.0.1",
            port,
            None,
            &ClientId::Domain("client.test".to_owned()),
            None,
            &Deadline::none(),
        )
        .err().unwrap();
        assert!(err.is_permanent());
        assert_eq!(err.status().map(u16::from), Some(554));
        assert_eq!(server.join().unwrap(), vec!["QUIT"]);
    }

    #[test]
    fn garbage_breaks_the_connection() {
        let (port, server) = serve(&["220 mx.test\r\n", "250 mx.test\r\n", "hello there\r\n"]);
        let mut conn = connect(port);
        let err = conn.test_connected(&Deadline::none()).unwrap_err();
        assert!(err.is_response());
        assert!(conn.has_broken());
        assert_eq!(server.join().unwrap(), vec!["EHLO client.test", "NOOP"]);
    }

    #[test]
    fn cancelled_deadline_breaks_the_connection() {
        let (port, server) = serve(&["220 mx.test\r\n", "250 mx.test\r\n"]);
        let mut conn = connect(port);
        let deadline = Deadline::none();
        deadline.cancel();
        let err = conn.test_connected(&deadline).unwrap_err();
        assert!(err.is_cancelled());
        assert!(conn.has_broken());
        drop(conn);
        assert_eq!(server.join().unwrap(), vec!["EHLO client.test"]);
    }
}
