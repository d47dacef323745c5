use crate::CertificateError;
use rustls::RootCertStore;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::PrivateKeyDer;
use std::ffi::OsString;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Adds all certificates found in `cert_file` to `root_store`.
pub fn add_certs_from_file(
    root_store: &mut RootCertStore,
    cert_file: impl AsRef<Path>,
) -> Result<(), CertificateError> {
    for cert in read_cert_chain(cert_file)? {
        root_store
            .add(cert)
            .map_err(|_| CertificateError::RootStoreAdd)?;
    }

    Ok(())
}

/// Adds all `.pem`/`.cer`/`.crt` certificates found in `cert_dir` to `root_store`.
pub fn add_certs_from_directory(
    root_store: &mut RootCertStore,
    cert_dir: impl AsRef<Path>,
) -> Result<(), CertificateError> {
    let files = fs::read_dir(&cert_dir).map_err(|error| CertificateError::IoError {
        path: cert_dir.as_ref().to_path_buf(),
        error,
    })?;
    let certs = files.filter_map(|f| f.ok()).filter(|file| {
        file.path()
            .extension()
            .filter(|&extension| {
                ["pem", "cer", "crt"]
                    .map(OsString::from)
                    .iter()
                    .any(|e| e == extension)
            })
            .is_some()
    });

    for cert_file in certs {
        add_certs_from_file(root_store, cert_file.path())?;
    }

    Ok(())
}

/// Loads a `RootCertStore` from either the OS trust store or a CA file/directory.
pub fn root_store_from_os_certs() -> Result<RootCertStore, CertificateError> {
    let mut root_store = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for err in loaded.errors {
        tracing::warn!("Ignoring an OS certificate that could not be loaded: {err}");
    }
    for cert in loaded.certs {
        let _ = root_store.add(cert);
    }
    Ok(root_store)
}

pub fn read_pvt_key(key_file: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>, CertificateError> {
    let key_file = key_file.as_ref();
    let f = File::open(key_file).map_err(|error| CertificateError::IoError {
        path: key_file.to_path_buf(),
        error,
    })?;
    let mut key_reader = BufReader::new(f);
    rustls_pemfile::private_key(&mut key_reader)
        .ok()
        .flatten()
        .ok_or_else(|| CertificateError::UnknownPrivateKeyFormat {
            path: key_file.to_path_buf(),
        })
}

pub fn read_cert_chain(
    cert_file: impl AsRef<Path>,
) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let cert_file = cert_file.as_ref();
    let f = File::open(cert_file).map_err(|error| CertificateError::IoError {
        path: cert_file.to_path_buf(),
        error,
    })?;
    let mut cert_reader = BufReader::new(f);
    rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertificateError::CertificateParseFailed {
            path: cert_file.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn read_cert_chain_rejects_garbage() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not a certificate").unwrap();

        let chain = read_cert_chain(temp_file.path()).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn read_pvt_key_rejects_garbage() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not a key").unwrap();

        assert!(read_pvt_key(temp_file.path()).is_err());
    }
}
