//! relaymail delivers mail through an SMTP relay.
//!
//! An [`SmtpClient`] keeps one cached, lifetime-bound session with the relay
//! and shares it between threads: it dials, secures the connection with TLS
//! or STARTTLS, authenticates with CRAM-MD5, NTLM or PLAIN, and replaces the
//! session once it is too old or broken. An [`Envelope`] is encoded to a MIME
//! message (a single part, or `multipart/mixed` with base64 attachments) and
//! streamed through the session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use relaymail::{Attachment, ClientConfig, Envelope, SmtpClient};
//!
//! # fn main() -> Result<(), relaymail::Error> {
//! let config = ClientConfig::builder("smtp.example.com")
//!     .port(587)
//!     .credentials("alice", "secret")
//!     .from("Alice <alice@example.com>")
//!     .build()?;
//! let client = SmtpClient::new(config);
//!
//! let mut envelope = Envelope::new("bob@example.com, carol@example.com", "Quarterly report", "See attached.")
//!     .cc("dave@example.com");
//! envelope.attach(Attachment::new("report.csv", b"month,total\n".to_vec()));
//!
//! client.send(&envelope)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! * `tracing` (default): logs the SMTP dialogue with `tracing`, credentials
//!   excluded
//! * `hostname` (default): uses the local host name in `EHLO`
//! * `ring` (default) or `aws-lc-rs`: the rustls crypto provider
//! * `webpki-roots` (default) or `rustls-native-certs`: trusted roots for
//!   verified TLS

#![forbid(unsafe_code)]
#![warn(missing_docs, trivial_casts, unused_import_braces)]

pub mod address;
mod base64;
pub mod error;
pub mod message;
mod rustls_crypto;
pub mod transport;

pub use crate::{
    address::{Address, AddressError},
    error::Error,
    message::{Attachment, Envelope, Mailbox},
    transport::smtp::{ClientConfig, Deadline, SmtpClient, TlsMode},
};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
