use std::{
    fmt::{self, Debug},
    str::FromStr,
    sync::Arc,
};

pub use self::rustls::Certificate;
pub(super) use self::rustls::ServerName;
use crate::{error, Error};

mod rustls;

/// How the connection gets encrypted
///
/// [`TlsMode::Probe`] is the default. It tries a TLS handshake on the port
/// first, and falls back to STARTTLS when that fails. The heuristic can guess
/// wrong, so set the mode explicitly when the port's convention is known.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plaintext only, STARTTLS is never attempted
    None,
    /// Plaintext, upgraded with STARTTLS when the server offers it
    ///
    /// A STARTTLS that is offered but then fails aborts the connection.
    Opportunistic,
    /// Plaintext, and STARTTLS must be offered and succeed
    Required,
    /// TLS from the first byte, as on port 465
    Wrapper,
    /// Decide between [`TlsMode::Wrapper`] and [`TlsMode::Opportunistic`]
    /// with [`probe_tls`](super::probe_tls)
    #[default]
    Probe,
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TlsMode::None),
            "opportunistic" => Ok(TlsMode::Opportunistic),
            "required" => Ok(TlsMode::Required),
            "wrapper" => Ok(TlsMode::Wrapper),
            "probe" => Ok(TlsMode::Probe),
            _ => Err(error::client(format!("unknown TLS mode: {s}"))),
        }
    }
}

/// TLS protocol versions.
#[derive(Debug, Copy, Clone, Default)]
#[non_exhaustive]
pub enum TlsVersion {
    /// TLS 1.2
    ///
    /// A good option for most SMTP servers.
    #[default]
    Tlsv12,
    /// TLS 1.3
    ///
    /// The most secure option, although not supported by all SMTP servers.
    Tlsv13,
}

/// Source for the base set of root certificates to trust.
#[allow(missing_copy_implementations)]
#[derive(Clone, Debug, Default)]
pub enum CertificateStore {
    /// The system store with the `rustls-native-certs` feature, the bundled
    /// Mozilla roots otherwise
    #[default]
    Default,
    /// Use a hardcoded set of Mozilla roots via the `webpki-roots` crate.
    #[cfg(feature = "webpki-roots")]
    WebpkiRoots,
    /// Use the certificates of the operating system
    #[cfg(feature = "rustls-native-certs")]
    NativeCerts,
    /// Don't use any system certificates.
    None,
}

/// Parameters to use for secure clients
#[derive(Clone)]
pub struct TlsParameters {
    pub(super) connector: Arc<::rustls::ClientConfig>,
    pub(super) server_name: ServerName,
    /// The domain name which is expected in the TLS certificate from the server
    domain: String,
    insecure: bool,
}

impl Debug for TlsParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsParameters")
            .field("domain", &self.domain)
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

impl TlsParameters {
    /// Verifying parameters for `domain`, trusting the default store
    pub fn new(domain: impl Into<String>) -> Result<Self, Error> {
        TlsParametersBuilder::new(domain.into()).build()
    }

    /// Parameters that accept any certificate presented for any name
    ///
    /// This is what [`ClientConfig`](crate::ClientConfig) uses when no
    /// parameters were given: the session is encrypted, but the server is not
    /// authenticated, so an active attacker can read and alter the traffic.
    /// Pass [`TlsParameters::new`] to the builder for verified sessions.
    pub fn insecure(domain: impl Into<String>) -> Result<Self, Error> {
        TlsParametersBuilder::new(domain.into())
            .certificate_store(CertificateStore::None)
            .dangerous_accept_invalid_certs(true)
            .dangerous_accept_invalid_hostnames(true)
            .build()
    }

    /// Creates a new `TlsParameters` builder
    pub fn builder(domain: impl Into<String>) -> TlsParametersBuilder {
        TlsParametersBuilder::new(domain.into())
    }

    /// The name expected in the server certificate
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether certificate or host name checks are disabled
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

/// Builder for `TlsParameters`
#[derive(Debug, Clone)]
pub struct TlsParametersBuilder {
    domain: String,
    cert_store: CertificateStore,
    root_certs: Vec<Certificate>,
    accept_invalid_hostnames: bool,
    accept_invalid_certs: bool,
    min_tls_version: TlsVersion,
}

impl TlsParametersBuilder {
    /// Creates a new builder for `TlsParameters`
    pub fn new(domain: String) -> Self {
        Self {
            domain,
            cert_store: CertificateStore::Default,
            root_certs: Vec::new(),
            accept_invalid_hostnames: false,
            accept_invalid_certs: false,
            min_tls_version: TlsVersion::Tlsv12,
        }
    }

    /// Set the source for the base set of root certificates to trust.
    pub fn certificate_store(mut self, cert_store: CertificateStore) -> Self {
        self.cert_store = cert_store;
        self
    }

    /// Add a custom root certificate
    ///
    /// Can be used to safely connect to a server using a self-signed certificate, for example.
    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.root_certs.push(cert);
        self
    }

    /// Controls whether certificates with an invalid hostname are accepted
    ///
    /// Defaults to `false`.
    ///
    /// # Warning
    ///
    /// If hostname verification is disabled *any* valid certificate,
    /// including those from other sites, are trusted.
    pub fn dangerous_accept_invalid_hostnames(mut self, accept_invalid_hostnames: bool) -> Self {
        self.accept_invalid_hostnames = accept_invalid_hostnames;
        self
    }

    /// Controls which minimum TLS version is allowed
    ///
    /// Defaults to [`Tlsv12`][TlsVersion::Tlsv12].
    pub fn set_min_tls_version(mut self, min_tls_version: TlsVersion) -> Self {
        self.min_tls_version = min_tls_version;
        self
    }

    /// Controls whether invalid certificates are accepted
    ///
    /// Defaults to `false`.
    ///
    /// # Warning
    ///
    /// If certificate verification is disabled, *any* certificate
    /// is trusted for use, including:
    ///
    /// * Self signed certificates
    /// * Certificates from different hostnames
    /// * Expired certificates
    pub fn dangerous_accept_invalid_certs(mut self, accept_invalid_certs: bool) -> Self {
        self.accept_invalid_certs = accept_invalid_certs;
        self
    }

    /// Creates a new `TlsParameters` backed by rustls
    pub fn build(self) -> Result<TlsParameters, Error> {
        let insecure = self.accept_invalid_certs || self.accept_invalid_hostnames;
        let (server_name, connector) = self::rustls::build_connector(&self)?;
        Ok(TlsParameters {
            connector,
            server_name,
            domain: self.domain,
            insecure,
        })
    }
}
