//! SASL mechanisms spoken over the `AUTH` command
//!
//! The mechanism is picked from what the server advertised with
//! [`select_mechanism`], then an [`Authenticator`] drives one exchange:
//! [`Authenticator::start`] names the mechanism and gives the optional
//! initial response, [`Authenticator::next`] answers each server reply.
//! Payloads are raw bytes; the connection takes care of base64.

use std::fmt::{self, Debug, Display, Formatter};

use hmac::{Hmac, Mac};
use md5::Md5;

use crate::{error, Error};

mod ntlm;

pub use self::ntlm::NtlmAuth;

type HmacMd5 = Hmac<Md5>;

/// Contains user credentials
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Credentials {
    authentication_identity: String,
    secret: String,
}

impl Credentials {
    /// Create a `Credentials` struct from username and password
    pub fn new(username: String, password: String) -> Credentials {
        Credentials {
            authentication_identity: username,
            secret: password,
        }
    }

    pub(crate) fn username(&self) -> &str {
        &self.authentication_identity
    }
}

impl<S, T> From<(S, T)> for Credentials
where
    S: Into<String>,
    T: Into<String>,
{
    fn from((username, password): (S, T)) -> Self {
        Credentials::new(username.into(), password.into())
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish()
    }
}

/// Represents authentication mechanisms
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug)]
pub enum Mechanism {
    /// PLAIN authentication mechanism, defined in
    /// [RFC 4616](https://tools.ietf.org/html/rfc4616)
    Plain,
    /// CRAM-MD5 challenge-response, defined in
    /// [RFC 2195](https://tools.ietf.org/html/rfc2195)
    CramMd5,
    /// NTLM, the Microsoft three message exchange described in
    /// [MS-NLMP](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nlmp/)
    Ntlm,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Mechanism::Plain => "PLAIN",
            Mechanism::CramMd5 => "CRAM-MD5",
            Mechanism::Ntlm => "NTLM",
        })
    }
}

impl Mechanism {
    pub(crate) const ALL: [Mechanism; 3] = [Mechanism::Plain, Mechanism::CramMd5, Mechanism::Ntlm];

    /// Parses the name used in `EHLO` replies, case insensitively
    pub fn from_keyword(keyword: &str) -> Option<Mechanism> {
        Mechanism::ALL
            .into_iter()
            .find(|m| keyword.eq_ignore_ascii_case(&m.to_string()))
    }
}

/// Chooses the mechanism to use from the advertised ones
///
/// CRAM-MD5 is preferred, then NTLM. PLAIN is the fallback, including
/// when the server lists no mechanism this crate knows.
///
/// ```
/// use relaymail::transport::smtp::authentication::{select_mechanism, Mechanism};
///
/// assert_eq!(select_mechanism(&[Mechanism::Ntlm, Mechanism::CramMd5]), Mechanism::CramMd5);
/// assert_eq!(select_mechanism(&[Mechanism::Plain, Mechanism::Ntlm]), Mechanism::Ntlm);
/// assert_eq!(select_mechanism(&[]), Mechanism::Plain);
/// ```
pub fn select_mechanism(advertised: &[Mechanism]) -> Mechanism {
    [Mechanism::CramMd5, Mechanism::Ntlm]
        .into_iter()
        .find(|m| advertised.contains(m))
        .unwrap_or(Mechanism::Plain)
}

/// What a mechanism may check before it starts
#[derive(Debug, Clone, Copy)]
pub struct ServerContext<'a> {
    /// Host the connection was opened to
    pub name: &'a str,
    /// Whether the connection is already encrypted
    pub tls: bool,
    /// Advertised mechanisms known to this crate
    pub mechanisms: &'a [Mechanism],
}

/// One authentication attempt, with the state its mechanism needs
#[derive(Debug)]
pub enum Authenticator {
    /// PLAIN mechanism
    Plain(PlainAuth),
    /// CRAM-MD5 mechanism
    CramMd5(CramMd5Auth),
    /// NTLM mechanism
    Ntlm(NtlmAuth),
}

impl Authenticator {
    /// Prepares `mechanism` for a server reached as `host`
    ///
    /// Fails for NTLM when the username is not `domain\username`.
    pub fn new(
        mechanism: Mechanism,
        credentials: &Credentials,
        host: &str,
        workstation: &str,
    ) -> Result<Authenticator, Error> {
        Ok(match mechanism {
            Mechanism::Plain => Authenticator::Plain(PlainAuth {
                credentials: credentials.clone(),
                host: host.to_owned(),
            }),
            Mechanism::CramMd5 => Authenticator::CramMd5(CramMd5Auth {
                credentials: credentials.clone(),
            }),
            Mechanism::Ntlm => Authenticator::Ntlm(NtlmAuth::new(host, credentials, workstation)?),
        })
    }

    /// Name sent in the `AUTH` command
    pub fn mechanism(&self) -> Mechanism {
        match self {
            Authenticator::Plain(_) => Mechanism::Plain,
            Authenticator::CramMd5(_) => Mechanism::CramMd5,
            Authenticator::Ntlm(_) => Mechanism::Ntlm,
        }
    }

    /// Checks the server and returns the initial response, if any
    pub fn start(&mut self, server: &ServerContext<'_>) -> Result<Option<Vec<u8>>, Error> {
        match self {
            Authenticator::Plain(auth) => auth.start(server).map(Some),
            Authenticator::CramMd5(_) => Ok(None),
            Authenticator::Ntlm(auth) => auth.start(server).map(|()| None),
        }
    }

    /// Answers the text of a server reply
    ///
    /// `more` is set for a `334` continuation, and unset once the server
    /// accepted the exchange. `None` means there is nothing left to send.
    pub fn next(&mut self, from_server: &str, more: bool) -> Result<Option<Vec<u8>>, Error> {
        if !more {
            return Ok(None);
        }
        match self {
            Authenticator::Plain(_) => Err(error::auth("unexpected server challenge")),
            Authenticator::CramMd5(auth) => auth.next(from_server).map(Some),
            Authenticator::Ntlm(auth) => auth.next(from_server).map(Some),
        }
    }
}

/// PLAIN, sent as an initial response
///
/// Refused over an unencrypted connection unless the server is this host.
pub struct PlainAuth {
    credentials: Credentials,
    host: String,
}

impl Debug for PlainAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainAuth").field("host", &self.host).finish()
    }
}

impl PlainAuth {
    fn start(&self, server: &ServerContext<'_>) -> Result<Vec<u8>, Error> {
        if !server.tls && !is_localhost(server.name) {
            return Err(error::auth("unencrypted connection"));
        }
        if server.name != self.host {
            return Err(error::auth("wrong host name"));
        }

        let Credentials {
            authentication_identity,
            secret,
        } = &self.credentials;
        Ok(format!("\u{0}{authentication_identity}\u{0}{secret}").into_bytes())
    }
}

fn is_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// CRAM-MD5: the username and the keyed digest of the challenge
#[derive(Debug)]
pub struct CramMd5Auth {
    credentials: Credentials,
}

impl CramMd5Auth {
    fn next(&self, challenge: &str) -> Result<Vec<u8>, Error> {
        let challenge = crate::base64::decode(challenge.trim())
            .map_err(|e| error::auth(format!("Invalid CRAM-MD5 challenge: {e}")))?;
        let digest = hmac_md5(self.credentials.secret.as_bytes(), &[challenge.as_slice()])?;

        let mut response = self.credentials.authentication_identity.clone();
        response.push(' ');
        for byte in digest {
            response.push_str(&format!("{byte:02x}"));
        }
        Ok(response.into_bytes())
    }
}

pub(crate) fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], Error> {
    let mut mac =
        HmacMd5::new_from_slice(key).map_err(|_| error::auth("invalid HMAC-MD5 key length"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}
