//! PEM-encoded TLS material shared by the Kafka client and the OTLP exporter.

use std::io;

use rustls_pemfile::{certs, private_key};
use thiserror::Error;

/// A validated CA bundle plus client certificate and key, kept as PEM text
/// because both downstream clients take PEM directly.
#[derive(Clone)]
pub struct TlsMaterial {
    ca_pem: String,
    cert_pem: String,
    key_pem: String,
}

impl TlsMaterial {
    /// Checks that `ca` holds at least one certificate and that `cert`/`key`
    /// hold a certificate and a private key.
    pub fn from_pem(ca: &[u8], cert: &[u8], key: &[u8]) -> Result<Self, CertError> {
        let ca_pem = pem_text(ca)?;
        let cert_pem = pem_text(cert)?;
        let key_pem = pem_text(key)?;

        match count_certs(ca) {
            Ok(0) | Err(_) => return Err(CertError::CaAppend),
            Ok(_) => {}
        }

        match count_certs(cert) {
            Ok(0) => return Err(CertError::KeyPair("no certificate found".to_string())),
            Ok(_) => {}
            Err(err) => return Err(CertError::KeyPair(err.to_string())),
        }

        match private_key(&mut &key[..]) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(CertError::KeyPair("no private key found".to_string())),
            Err(err) => return Err(CertError::KeyPair(err.to_string())),
        }

        Ok(Self {
            ca_pem,
            cert_pem,
            key_pem,
        })
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Certificate followed by key, the layout client identity loaders expect.
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = Vec::with_capacity(self.cert_pem.len() + self.key_pem.len() + 1);
        pem.extend_from_slice(self.cert_pem.as_bytes());
        if !self.cert_pem.ends_with('\n') {
            pem.push(b'\n');
        }
        pem.extend_from_slice(self.key_pem.as_bytes());
        pem
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial").finish_non_exhaustive()
    }
}

fn count_certs(pem: &[u8]) -> io::Result<usize> {
    let mut count = 0;
    for cert in certs(&mut &pem[..]) {
        cert?;
        count += 1;
    }
    Ok(count)
}

fn pem_text(pem: &[u8]) -> Result<String, CertError> {
    String::from_utf8(pem.to_vec()).map_err(|_| CertError::Encoding)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertError {
    #[error("failed to append server CA certificate")]
    CaAppend,
    #[error("failed to parse client:key pair: {0}")]
    KeyPair(String),
    #[error("TLS material is not UTF-8 PEM text")]
    Encoding,
}
