use std::sync::Arc;

use rustls::crypto::CryptoProvider;

/// Provider selected by the `aws-lc-rs` feature, ring otherwise
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    #[cfg(feature = "aws-lc-rs")]
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    #[cfg(not(feature = "aws-lc-rs"))]
    let provider = rustls::crypto::ring::default_provider();
    Arc::new(provider)
}
