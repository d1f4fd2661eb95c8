use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, PrivateKey, RootCertStore, ServerName};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DrouterError, DrouterResult};

/// TLS options for the outbound proxy client and the registration channel.
///
/// Listener-side TLS is handled outside the routing core; these options only
/// shape how drouter talks to backends and front doors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Client certificate (PEM) presented to the peer, if any
    pub certificate: Option<String>,
    /// Private key (PEM) for the client certificate
    pub private_key: Option<String>,
    /// Additional root CA bundle (PEM) trusted for peer verification
    pub ca: Option<String>,
    /// Skip peer certificate verification entirely
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.certificate.is_some() != self.private_key.is_some() {
            return Err(anyhow::anyhow!(
                "TLS certificate and private_key must be configured together"
            ));
        }
        Ok(())
    }

    /// Build the rustls client configuration these options describe.
    pub fn client_config(&self) -> DrouterResult<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        if let Some(ca) = &self.ca {
            let mut added = 0;
            for cert in read_certs(ca)? {
                roots
                    .add(&cert)
                    .map_err(|e| DrouterError::tls(format!("invalid root ca: {}", e)))?;
                added += 1;
            }
            info!(ca, certificates = added, "loaded extra root CAs");
        }

        let builder = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots);

        let mut config = match (&self.certificate, &self.private_key) {
            (Some(cert_path), Some(key_path)) => {
                let certs = read_certs(cert_path)?;
                let key = read_private_key(key_path)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| DrouterError::tls(format!("invalid client key pair: {}", e)))?
            }
            _ => builder.with_no_client_auth(),
        };

        if self.insecure_skip_verify {
            warn!("TLS peer verification disabled");
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCert));
        }

        Ok(config)
    }
}

fn read_certs(path: &str) -> DrouterResult<Vec<Certificate>> {
    let file = File::open(path)
        .map_err(|e| DrouterError::tls(format!("can't open certificate {}: {}", path, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| DrouterError::tls(format!("can't parse certificate {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(DrouterError::tls(format!(
            "no certificates found in {}",
            path
        )));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn read_private_key(path: &str) -> DrouterResult<PrivateKey> {
    let file = File::open(path)
        .map_err(|e| DrouterError::tls(format!("can't open private key {}: {}", path, e)))?;
    let key = rustls_pemfile::read_all(&mut BufReader::new(file))
        .map_err(|e| DrouterError::tls(format!("can't parse private key {}: {}", path, e)))?
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::ECKey(key) => Some(PrivateKey(key)),
            _ => None,
        });
    key.ok_or_else(|| DrouterError::tls(format!("no private key found in {}", path)))
}

/// Verifier that accepts any server certificate, backing
/// `insecure_skip_verify`.
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
