//! The SMTP client delivers envelopes to a relay.
//!
//! This client follows [RFC 5321](https://tools.ietf.org/html/rfc5321), and
//! relies as much as possible on the relay server for sanity and RFC
//! compliance checks.
//!
//! It implements the following extensions:
//!
//! * 8BITMIME ([RFC 6152](https://tools.ietf.org/html/rfc6152))
//! * SMTPUTF8 ([RFC 6531](https://tools.ietf.org/html/rfc6531))
//! * AUTH ([RFC 4954](http://tools.ietf.org/html/rfc4954)) with PLAIN, CRAM-MD5 and NTLM
//! * STARTTLS ([RFC 2487](http://tools.ietf.org/html/rfc2487))
//!
//! #### Sessions
//!
//! An [`SmtpClient`] keeps one [`Session`]: a connection that has been
//! greeted, upgraded to TLS when possible and authenticated when credentials
//! are configured. The session is reused by every send until it is
//! [`max_lifetime`](ClientConfigBuilder::max_lifetime) old or broken by a
//! failure, then replaced. When several threads find it missing at the same
//! time, one of them connects and the others wait for its result.
//!
//! #### Encryption
//!
//! By default ([`TlsMode::Probe`]) the client tries a TLS handshake on the
//! port to guess whether it expects TLS from the first byte, and otherwise
//! upgrades with STARTTLS when the server offers it. Certificates are **not**
//! verified unless [`TlsParameters::new`] is passed to the builder.
//!
//! ```rust,no_run
//! use relaymail::{
//!     transport::smtp::{TlsMode, TlsParameters},
//!     ClientConfig, Envelope, SmtpClient,
//! };
//!
//! # fn main() -> Result<(), relaymail::Error> {
//! let config = ClientConfig::builder("smtp.example.com")
//!     .port(465)
//!     .tls_mode(TlsMode::Wrapper)
//!     .tls_parameters(TlsParameters::new("smtp.example.com")?)
//!     .credentials("CORP\\alice", "secret")
//!     .workstation("WS01")
//!     .from("alice@example.com")
//!     .build()?;
//!
//! let client = SmtpClient::new(config);
//! client.send(&Envelope::new("bob@example.com", "Report", "See attached."))?;
//! client.close();
//! # Ok(())
//! # }
//! ```

pub use self::{
    client::{
        probe_tls, Certificate, CertificateStore, SmtpConnection, TlsMode, TlsParameters,
        TlsParametersBuilder, TlsVersion,
    },
    config::{ClientConfig, ClientConfigBuilder, DEFAULT_MAX_LIFETIME},
    deadline::Deadline,
    response::Response,
    session::{is_expired, Session},
    transport::SmtpClient,
};
pub use crate::error::Error;

pub mod authentication;
pub mod client;
pub mod commands;
mod config;
mod deadline;
pub mod extension;
pub mod response;
mod session;
mod transport;

/// Default smtp port
pub const SMTP_PORT: u16 = 25;
/// Default submission port
pub const SUBMISSION_PORT: u16 = 587;
/// Default submission over TLS port
///
/// Defined in [RFC8314](https://tools.ietf.org/html/rfc8314)
pub const SUBMISSIONS_PORT: u16 = 465;
