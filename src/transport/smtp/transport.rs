use std::sync::Arc;

use super::{
    config::ClientConfig,
    response::Response,
    session::{Session, SessionManager},
    Deadline,
};
use crate::{message::Envelope, Error};

/// Sends envelopes through one cached relay session
///
/// Cloning is cheap and clones share the session, so a client can be handed
/// to as many threads as needed. The session is opened on first use, reused
/// until it is older than [`ClientConfig::max_lifetime`] or broken, and
/// closed with `QUIT` by [`SmtpClient::close`] or when the last clone is
/// dropped.
///
/// ```rust,no_run
/// use relaymail::{ClientConfig, Envelope, SmtpClient};
///
/// # fn main() -> Result<(), relaymail::Error> {
/// let config = ClientConfig::builder("smtp.example.com")
///     .port(587)
///     .credentials("alice", "secret")
///     .from("Alice <alice@example.com>")
///     .build()?;
/// let client = SmtpClient::new(config);
///
/// let envelope = Envelope::new("bob@example.com; carol@example.com", "Hi", "hello")
///     .cc("dave@example.com");
/// client.send(&envelope)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SmtpClient {
    inner: Arc<SessionManager>,
}

impl SmtpClient {
    /// Creates a client, no connection is opened yet
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(SessionManager::new(config)),
        }
    }

    /// The configuration the client was created with
    pub fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    /// Encodes and sends an envelope
    ///
    /// Errors are returned as they happened, with no retry. A failure after
    /// some recipients were accepted still fails the whole send.
    pub fn send(&self, envelope: &Envelope) -> Result<Response, Error> {
        self.send_with(envelope, &Deadline::none())
    }

    /// [`SmtpClient::send`], stopped when `deadline` fires
    pub fn send_with(&self, envelope: &Envelope, deadline: &Deadline) -> Result<Response, Error> {
        let message = envelope.encode(self.config().from())?;
        let session = self.inner.session(deadline)?;
        let response = session.send(&message, deadline)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "message for {} recipients accepted on session {}: {}",
            message.recipients().len(),
            session.id(),
            response.text()
        );
        Ok(response)
    }

    /// The ready session, opened or replaced first if needed
    pub fn session(&self) -> Result<Arc<Session>, Error> {
        self.inner.session(&Deadline::none())
    }

    /// [`SmtpClient::session`], stopped when `deadline` fires
    pub fn session_with(&self, deadline: &Deadline) -> Result<Arc<Session>, Error> {
        self.inner.session(deadline)
    }

    /// Checks the relay answers `NOOP` on the current session
    pub fn test_connection(&self) -> Result<bool, Error> {
        let session = self.inner.session(&Deadline::none())?;
        Ok(session.noop(&Deadline::none()).is_ok())
    }

    /// Sends `QUIT` and forgets the session
    ///
    /// The next send opens a new one.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("config", self.config())
            .finish_non_exhaustive()
    }
}
