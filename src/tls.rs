use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config::TlsFiles;

/// Build the acceptor for `ROADSTAY_TLS_CERT` / `ROADSTAY_TLS_KEY`. `None`
/// means plaintext.
pub fn load_tls_acceptor(files: Option<&TlsFiles>) -> io::Result<Option<TlsAcceptor>> {
    let Some(files) = files else {
        return Ok(None);
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut open(&files.cert)?).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates in {}", files.cert.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut open(&files.key)?)?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("no private key in {}", files.key.display()),
        )
    })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}
