use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        verify_server_cert_signed_by_trust_anchor, verify_server_name,
    },
    crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms},
    pki_types::{self, CertificateDer, UnixTime},
    server::ParsedCertificate,
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion,
};

use super::{CertificateStore, TlsParametersBuilder, TlsVersion};
use crate::{error, Error};

/// Builds the rustls configuration and the name to present in SNI
pub(super) fn build_connector(
    builder: &TlsParametersBuilder,
) -> Result<(ServerName, Arc<ClientConfig>), Error> {
    let provider = crate::rustls_crypto::crypto_provider();
    let algorithms = provider.signature_verification_algorithms;
    let roots = root_store(builder)?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(protocol_versions(builder.min_tls_version))
        .map_err(error::tls)?;
    let config = if builder.accept_invalid_certs || builder.accept_invalid_hostnames {
        config
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(RelaxedVerifier {
                check_chain: !builder.accept_invalid_certs,
                check_name: !builder.accept_invalid_hostnames,
                roots,
                algorithms,
            }))
    } else {
        config.with_root_certificates(roots)
    };

    let server_name = ServerName::try_from(builder.domain.clone())?;
    Ok((server_name, Arc::new(config.with_no_client_auth())))
}

fn protocol_versions(min: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
    match min {
        TlsVersion::Tlsv12 => rustls::ALL_VERSIONS,
        TlsVersion::Tlsv13 => TLS13_ONLY,
    }
}

/// The configured store plus the extra roots
fn root_store(builder: &TlsParametersBuilder) -> Result<RootCertStore, Error> {
    let mut roots = RootCertStore::empty();
    match builder.cert_store {
        CertificateStore::Default => {
            #[cfg(feature = "rustls-native-certs")]
            add_native_roots(&mut roots);
            #[cfg(all(feature = "webpki-roots", not(feature = "rustls-native-certs")))]
            add_webpki_roots(&mut roots);
        }
        #[cfg(feature = "webpki-roots")]
        CertificateStore::WebpkiRoots => add_webpki_roots(&mut roots),
        #[cfg(feature = "rustls-native-certs")]
        CertificateStore::NativeCerts => add_native_roots(&mut roots),
        CertificateStore::None => {}
    }

    for cert in &builder.root_certs {
        roots.add(cert.0.clone()).map_err(error::tls)?;
    }
    Ok(roots)
}

#[cfg(feature = "rustls-native-certs")]
fn add_native_roots(roots: &mut RootCertStore) {
    let loaded = rustls_native_certs::load_native_certs();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    #[cfg(feature = "tracing")]
    tracing::debug!(
        "native roots: {added} added, {ignored} unparsable, {} load errors",
        loaded.errors.len()
    );
    #[cfg(not(feature = "tracing"))]
    let _ = (added, ignored);
}

#[cfg(feature = "webpki-roots")]
fn add_webpki_roots(roots: &mut RootCertStore) {
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
}

/// Host name or address checked against the server certificate
#[derive(Clone)]
pub(in crate::transport::smtp) struct ServerName {
    name: pki_types::ServerName<'static>,
    text: Box<str>,
}

impl ServerName {
    pub(in crate::transport::smtp) fn inner(&self) -> pki_types::ServerName<'static> {
        self.name.clone()
    }

    fn try_from(text: String) -> Result<Self, Error> {
        let name = pki_types::ServerName::try_from(text.as_str())
            .map_err(|e| error::tls(format!("invalid server name {text:?}: {e}")))?
            .to_owned();
        Ok(Self {
            name,
            text: text.into_boxed_str(),
        })
    }
}

impl AsRef<str> for ServerName {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// A trusted root certificate
#[derive(Clone)]
pub struct Certificate(CertificateDer<'static>);

impl Certificate {
    /// Create a `Certificate` from a DER encoded certificate
    pub fn from_der(der: Vec<u8>) -> Self {
        Self(der.into())
    }

    /// Create a `Certificate` from a PEM encoded certificate
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        use rustls::pki_types::pem::PemObject as _;

        CertificateDer::from_pem_slice(pem)
            .map(Self)
            .map_err(|_| error::tls("invalid certificate"))
    }
}

impl Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate").finish_non_exhaustive()
    }
}

/// Verifier skipping the chain check, the name check, or both
///
/// Handshake signatures are always verified, so the peer still has to own
/// the key of the certificate it presents.
#[derive(Debug)]
struct RelaxedVerifier {
    check_chain: bool,
    check_name: bool,
    roots: RootCertStore,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for RelaxedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        if self.check_chain {
            verify_server_cert_signed_by_trust_anchor(
                &cert,
                &self.roots,
                intermediates,
                now,
                self.algorithms.all,
            )?;
        }
        if self.check_name {
            verify_server_name(&cert, server_name)?;
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
