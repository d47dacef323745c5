//! TLS credential loading for the cloud MQTT connection.
//!
//! Device and CA certificate *provisioning* (generating a CSR, obtaining a
//! signed certificate from the cloud) is out of scope for this crate: it is
//! handled by an external collaborator before the agent ever starts. This
//! crate only turns already-provisioned PEM files on disk into the
//! `rustls` types the MQTT channel needs to open a TLS connection.

use std::path::PathBuf;

pub mod parse_root_certificate;

#[derive(thiserror::Error, Debug)]
pub enum CertificateError {
    #[error("Could not access {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Could not parse certificate {path}")]
    CertificateParseFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Fail to parse the private key at {path}")]
    UnknownPrivateKeyFormat { path: PathBuf },

    #[error("Failed to add a certificate to the trust store")]
    RootStoreAdd,

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
