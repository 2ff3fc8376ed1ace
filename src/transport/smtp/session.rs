//! The cached relay session and the manager that owns it

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::{Duration, Instant},
};

use super::{
    client::{probe_tls, SmtpConnection, TlsMode},
    config::ClientConfig,
    extension::ServerInfo,
    response::Response,
    Deadline,
};
use crate::{error, message::EncodedMessage, Error};

/// How often a caller waiting on another caller's connection attempt
/// looks at its own deadline
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Whether a session opened at `created` is too old at `now`
///
/// A session reaching exactly its lifetime counts as expired.
///
/// ```
/// use std::time::{Duration, Instant};
/// use relaymail::transport::smtp::is_expired;
///
/// let created = Instant::now();
/// let lifetime = Duration::from_secs(60);
/// assert!(!is_expired(created, created + Duration::from_secs(59), lifetime));
/// assert!(is_expired(created, created + lifetime, lifetime));
/// ```
pub fn is_expired(created: Instant, now: Instant, lifetime: Duration) -> bool {
    now.saturating_duration_since(created) >= lifetime
}

/// A connected, greeted, and (when credentials are configured) authenticated
/// SMTP connection
///
/// Sessions are only handed out once fully set up. Commands on one session
/// are serialized. The connection is closed with `QUIT` when the session is
/// replaced, when the client is closed, or when the last handle is dropped.
pub struct Session {
    id: u64,
    created: Instant,
    broken: AtomicBool,
    encrypted: bool,
    server_info: ServerInfo,
    conn: Mutex<SmtpConnection>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("broken", &self.is_broken())
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(id: u64, conn: SmtpConnection) -> Self {
        Self {
            id,
            created: Instant::now(),
            broken: AtomicBool::new(false),
            encrypted: conn.is_encrypted(),
            server_info: conn.server_info().clone(),
            conn: Mutex::new(conn),
        }
    }

    /// Identifies the underlying connection, unique per client
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session became ready
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Time since the session became ready
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Whether a failure left the connection unusable
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Whether the connection is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// What the server announced in its last EHLO reply
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub(crate) fn send(
        &self,
        message: &EncodedMessage,
        deadline: &Deadline,
    ) -> Result<Response, Error> {
        self.with_connection(|conn| conn.send(message, deadline))
    }

    pub(crate) fn noop(&self, deadline: &Deadline) -> Result<Response, Error> {
        self.with_connection(|conn| conn.test_connected(deadline))
    }

    /// Sends QUIT unless the connection is already gone
    pub(crate) fn close(&self) {
        let mut conn = self.lock();
        if !conn.has_broken() {
            #[cfg(feature = "tracing")]
            tracing::debug!("closing session {}", self.id);
            let _ = conn.quit();
        }
        self.broken.store(true, Ordering::SeqCst);
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut SmtpConnection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut conn = self.lock();
        if conn.has_broken() {
            self.broken.store(true, Ordering::SeqCst);
            return Err(error::network("session is closed"));
        }
        let result = op(&mut conn);
        self.broken.store(conn.has_broken(), Ordering::SeqCst);
        result
    }

    fn lock(&self) -> MutexGuard<'_, SmtpConnection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// State of the connection attempt shared by concurrent callers
#[derive(Default)]
struct Flight {
    building: bool,
    /// Bumped each time an attempt ends
    generation: u64,
    /// Error of the last attempt, for the callers that waited on it
    ///
    /// Left empty when the attempt only ran out of its caller's time, so
    /// waiters with time left start their own.
    failure: Option<Error>,
}

/// Owns the cached session of one client
///
/// Readers share the cached session under a read lock. When it is missing,
/// expired or broken, exactly one caller opens a new connection while the
/// others wait for that attempt and share its outcome.
pub(crate) struct SessionManager {
    config: ClientConfig,
    current: RwLock<Option<Arc<Session>>>,
    flight: Mutex<Flight>,
    landed: Condvar,
    next_id: AtomicU64,
}

impl SessionManager {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            flight: Mutex::new(Flight::default()),
            landed: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the cached session, replacing it first when needed
    pub(crate) fn session(&self, deadline: &Deadline) -> Result<Arc<Session>, Error> {
        loop {
            deadline.check()?;
            if let Some(session) = self.usable() {
                #[cfg(feature = "tracing")]
                tracing::debug!("reusing session {}", session.id);
                return Ok(session);
            }

            let mut flight = self.lock_flight();
            if flight.building {
                let generation = flight.generation;
                while flight.building && flight.generation == generation {
                    deadline.check()?;
                    flight = self
                        .landed
                        .wait_timeout(flight, deadline.cap(WAIT_POLL))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                if let Some(ref failure) = flight.failure {
                    return Err(failure.replicate());
                }
                continue;
            }

            // an attempt may have landed between the read and the lock
            if let Some(session) = self.usable() {
                return Ok(session);
            }
            flight.building = true;
            drop(flight);

            let landing = Landing {
                manager: self,
                done: false,
            };
            let result = self.establish(deadline);
            return landing.land(result, deadline);
        }
    }

    /// Closes the cached session, if any
    pub(crate) fn close(&self) {
        let session = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.close();
        }
    }

    fn usable(&self) -> Option<Arc<Session>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        let session = current.as_ref()?;
        if session.is_broken() {
            #[cfg(feature = "tracing")]
            tracing::debug!("session {} is broken", session.id);
            return None;
        }
        if is_expired(session.created, Instant::now(), self.config.max_lifetime()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("session {} expired after {:?}", session.id, session.age());
            return None;
        }
        Some(Arc::clone(session))
    }

    /// Dials, secures, greets and authenticates a new connection
    fn establish(&self, deadline: &Deadline) -> Result<Session, Error> {
        let config = &self.config;
        let mode = match config.tls_mode() {
            TlsMode::Probe => {
                if probe_tls(config.host(), config.port(), deadline) {
                    TlsMode::Wrapper
                } else {
                    TlsMode::Opportunistic
                }
            }
            mode => mode,
        };

        let wrapper = (mode == TlsMode::Wrapper).then(|| config.tls_parameters());
        let mut conn = SmtpConnection::connect(
            config.host(),
            config.port(),
            config.timeout(),
            config.hello_name(),
            wrapper,
            deadline,
        )?;

        match mode {
            TlsMode::Opportunistic if conn.can_starttls() => {
                conn.starttls(config.tls_parameters(), config.hello_name(), deadline)?;
            }
            TlsMode::Required => {
                conn.starttls(config.tls_parameters(), config.hello_name(), deadline)?;
            }
            _ => {}
        }

        if let Some(credentials) = config.credentials() {
            if conn.server_info().auth_advertised() {
                conn.auth(credentials, config.workstation(), deadline)?;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        #[cfg(feature = "tracing")]
        tracing::debug!("session {id} ready with {}", conn.server_info());
        Ok(Session::new(id, conn))
    }

    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ends the attempt in progress, even when establishing panicked
struct Landing<'a> {
    manager: &'a SessionManager,
    done: bool,
}

impl Landing<'_> {
    fn land(
        mut self,
        result: Result<Session, Error>,
        deadline: &Deadline,
    ) -> Result<Arc<Session>, Error> {
        let manager = self.manager;
        let mut flight = manager.lock_flight();
        let outcome = match result {
            Ok(session) => {
                let session = Arc::new(session);
                let replaced = manager
                    .current
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(Arc::clone(&session));
                flight.failure = None;
                Ok((session, replaced))
            }
            Err(err) => {
                // socket timeouts are capped by the deadline, so check it too
                flight.failure = if err.is_cancelled() || deadline.is_cancelled() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("connection attempt abandoned: {err}");
                    None
                } else {
                    Some(err.replicate())
                };
                Err(err)
            }
        };
        flight.building = false;
        flight.generation += 1;
        drop(flight);
        manager.landed.notify_all();
        self.done = true;

        let (session, replaced) = outcome?;
        if let Some(replaced) = replaced {
            #[cfg(feature = "tracing")]
            tracing::debug!("session {} replaced by {}", replaced.id, session.id);
            replaced.close();
        }
        Ok(session)
    }
}

impl Drop for Landing<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut flight = self.manager.lock_flight();
        flight.failure = Some(error::client("connection attempt panicked"));
        flight.building = false;
        flight.generation += 1;
        drop(flight);
        self.manager.landed.notify_all();
    }
}
