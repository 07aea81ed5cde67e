//! Client certificate loading for mutual TLS to a provider's upstream.
//!
//! Certificates are referenced by name in provider records and resolved
//! through a [`CertificateLoader`]. A load failure never aborts bundle
//! construction; the provider simply runs without mutual TLS.

use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Errors that can occur while loading certificate material.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    /// Failed to read a PEM file.
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// PEM data could not be parsed.
    #[error("invalid PEM data for '{reference}': {reason}")]
    InvalidPem { reference: String, reason: String },

    /// No certificate block found.
    #[error("no certificates found for '{0}'")]
    NoCertificates(String),

    /// No private key block found.
    #[error("no private key found for '{0}'")]
    NoPrivateKey(String),

    /// The pair could not be turned into a client identity.
    #[error("invalid client identity for '{reference}': {reason}")]
    Identity { reference: String, reason: String },
}

/// A parsed certificate chain and its private key.
pub struct Certificate {
    reference: String,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    pem: Vec<u8>,
}

impl Certificate {
    /// Parse a certificate chain and private key from PEM.
    pub fn from_pem(
        reference: &str,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self, CertificateError> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertificateError::InvalidPem {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
        if chain.is_empty() {
            return Err(CertificateError::NoCertificates(reference.to_string()));
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| CertificateError::InvalidPem {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CertificateError::NoPrivateKey(reference.to_string()))?;

        let mut pem = cert_pem.to_vec();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(key_pem);

        Ok(Self {
            reference: reference.to_string(),
            chain,
            key,
            pem,
        })
    }

    /// Name the certificate was loaded under.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Private key matching the leaf certificate.
    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Client identity for outbound requests.
    pub fn identity(&self) -> Result<reqwest::Identity, CertificateError> {
        reqwest::Identity::from_pem(&self.pem).map_err(|e| CertificateError::Identity {
            reference: self.reference.clone(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("reference", &self.reference)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Source of certificate material.
pub trait CertificateLoader: Send + Sync {
    /// Load the certificate registered under `reference`.
    fn load(&self, reference: &str) -> Result<Certificate, CertificateError>;
}

/// Load a certificate through `loader`, logging the outcome.
pub fn load_certificate(
    reference: &str,
    loader: &dyn CertificateLoader,
) -> Result<Certificate, CertificateError> {
    tracing::debug!(certificate = %reference, "Loading client certificate");
    let certificate = loader.load(reference)?;
    tracing::debug!(
        certificate = %reference,
        chain_len = certificate.chain().len(),
        "Loaded client certificate"
    );
    Ok(certificate)
}

/// Loads `<dir>/<reference>.crt` and `<dir>/<reference>.key`.
#[derive(Debug, Clone)]
pub struct PemDirectoryLoader {
    dir: PathBuf,
}

impl PemDirectoryLoader {
    /// Create a loader rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory certificates are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, CertificateError> {
        std::fs::read(path).map_err(|e| CertificateError::Read {
            path: path.display().to_string(),
            source: e,
        })
    }
}

impl CertificateLoader for PemDirectoryLoader {
    fn load(&self, reference: &str) -> Result<Certificate, CertificateError> {
        // References come from the control plane; keep them inside the directory.
        if reference.is_empty() || reference.contains(['/', '\\']) || reference.starts_with('.') {
            return Err(CertificateError::InvalidPem {
                reference: reference.to_string(),
                reason: "invalid certificate reference".to_string(),
            });
        }

        let cert_pem = self.read(&self.dir.join(format!("{}.crt", reference)))?;
        let key_pem = self.read(&self.dir.join(format!("{}.key", reference)))?;
        Certificate::from_pem(reference, &cert_pem, &key_pem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Generate a self-signed certificate and private key for testing
    fn generate_test_cert() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("Failed to generate test certificate");
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    #[test]
    fn test_from_pem() {
        let (cert_pem, key_pem) = generate_test_cert();
        let certificate =
            Certificate::from_pem("upstream", cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();

        assert_eq!(certificate.reference(), "upstream");
        assert_eq!(certificate.chain().len(), 1);
        assert!(certificate.identity().is_ok());
    }

    #[test]
    fn test_from_pem_without_key() {
        let (cert_pem, _) = generate_test_cert();
        let err = Certificate::from_pem("upstream", cert_pem.as_bytes(), b"").unwrap_err();
        assert!(matches!(err, CertificateError::NoPrivateKey(_)));
    }

    #[test]
    fn test_from_pem_without_certificate() {
        let (_, key_pem) = generate_test_cert();
        let err = Certificate::from_pem("upstream", b"", key_pem.as_bytes()).unwrap_err();
        assert!(matches!(err, CertificateError::NoCertificates(_)));
    }

    #[test]
    fn test_directory_loader() {
        let dir = TempDir::new().unwrap();
        let (cert_pem, key_pem) = generate_test_cert();
        fs::write(dir.path().join("mtls.crt"), cert_pem).unwrap();
        fs::write(dir.path().join("mtls.key"), key_pem).unwrap();

        let loader = PemDirectoryLoader::new(dir.path());
        let certificate = load_certificate("mtls", &loader).unwrap();
        assert_eq!(certificate.reference(), "mtls");
    }

    #[test]
    fn test_directory_loader_missing_files() {
        let dir = TempDir::new().unwrap();
        let loader = PemDirectoryLoader::new(dir.path());
        let err = loader.load("absent").unwrap_err();
        assert!(matches!(err, CertificateError::Read { .. }));
    }

    #[test]
    fn test_directory_loader_rejects_traversal() {
        let loader = PemDirectoryLoader::new("/tmp");
        assert!(loader.load("../etc/passwd").is_err());
        assert!(loader.load("").is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let (cert_pem, key_pem) = generate_test_cert();
        let certificate =
            Certificate::from_pem("upstream", cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();
        let debug = format!("{:?}", certificate);
        assert!(debug.contains("upstream"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
