//! TLS context factory.
//!
//! Every session attempt shares one `rustls::ClientConfig`, built once per
//! engine from the platform's native trust store (the OS certificate store
//! on Windows, the default verify paths elsewhere).

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};

use crate::error::{ConnectError, Result};

/// Build the shared TLS client configuration for an engine.
///
/// Peer verification is always on; there is no "danger" escape hatch in
/// production code paths.
pub fn build_client_config() -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::warn!(%err, "skipped an unreadable entry while loading native certificates");
    }
    let (added, _) = root_store.add_parsable_certificates(native.certs);
    if added == 0 {
        return Err(ConnectError::TlsSetup(
            "no usable root certificates found in the platform trust store".to_string(),
        ));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[test]
    fn builds_a_usable_client_config() {
        install_crypto_provider();
        let config = build_client_config();
        assert!(config.is_ok());
    }
}
