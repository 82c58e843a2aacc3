use crate::error::TrustError;
use log::{info, warn};
use ocsp::common::asn1::Bytes;
use ocsp::oid::ALGO_SHA256_WITH_RSA_ENCRYPTION_DOT;
use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, SHA256};
use ring::{rand, signature};
use std::fs;
use std::path::Path;
use x509_parser::der_parser::der::parse_der;
use zeroize::Zeroize;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";
const PKCS8_LABEL: &str = "PRIVATE KEY";
const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";

/// An X.509 certificate, kept as DER alongside the fields the responder needs.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Bytes,
    subject: String,
    public_key: Vec<u8>,
    ocsp_signing: bool,
}

impl Certificate {
    pub fn from_der(der: Bytes) -> Result<Self, String> {
        let (subject, public_key, ocsp_signing) = {
            let (_, cert) =
                x509_parser::parse_x509_certificate(&der).map_err(|e| e.to_string())?;
            let ocsp_signing = cert
                .extended_key_usage()
                .ok()
                .flatten()
                .is_some_and(|eku| eku.value.ocsp_signing || eku.value.any);
            (
                cert.subject().to_string(),
                cert.public_key().subject_public_key.data.to_vec(),
                ocsp_signing,
            )
        };
        Ok(Certificate {
            der,
            subject,
            public_key,
            ocsp_signing,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn has_ocsp_signing(&self) -> bool {
        self.ocsp_signing
    }

    /// SHA-1 of the subject public key, as used by `ResponderID byKey`.
    pub fn key_hash(&self) -> Vec<u8> {
        ring::digest::digest(&SHA1_FOR_LEGACY_USE_ONLY, &self.public_key)
            .as_ref()
            .to_vec()
    }

    /// Whether `hash` is the SHA-1 or SHA-256 hash of this certificate's public key.
    pub fn matches_key_hash(&self, hash: &[u8]) -> bool {
        [&SHA1_FOR_LEGACY_USE_ONLY, &SHA256]
            .into_iter()
            .any(|alg| ring::digest::digest(alg, &self.public_key).as_ref() == hash)
    }
}

/// Signing capability of the responder, one variant per supported algorithm.
#[derive(Debug)]
pub enum SigningKey {
    RsaSha256(signature::RsaKeyPair),
}

impl SigningKey {
    fn from_pkcs8(der: &[u8]) -> Result<Self, ring::error::KeyRejected> {
        signature::RsaKeyPair::from_pkcs8(der).map(SigningKey::RsaSha256)
    }

    /// Dotted OID of the signature algorithm written into responses.
    pub fn algorithm(&self) -> &'static str {
        match self {
            SigningKey::RsaSha256(_) => ALGO_SHA256_WITH_RSA_ENCRYPTION_DOT,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ring::error::Unspecified> {
        match self {
            SigningKey::RsaSha256(pair) => {
                let rng = rand::SystemRandom::new();
                let mut signature = vec![0u8; pair.public().modulus_len()];
                pair.sign(&signature::RSA_PKCS1_SHA256, &rng, message, &mut signature)?;
                Ok(signature)
            }
        }
    }

    fn public_key(&self) -> &[u8] {
        match self {
            SigningKey::RsaSha256(pair) => pair.public().as_ref(),
        }
    }
}

fn read_pem(path: &Path, label: &str) -> Result<Vec<u8>, TrustError> {
    let mut content = fs::read(path).map_err(|source| TrustError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = pem::parse(&content);
    content.zeroize();
    let parsed = parsed.map_err(|e| TrustError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if parsed.tag() != label {
        let reason = format!("expected PEM label {label}, found {}", parsed.tag());
        let mut der = parsed.into_contents();
        der.zeroize();
        return Err(TrustError::Decode {
            path: path.to_path_buf(),
            reason,
        });
    }
    Ok(parsed.into_contents())
}

pub fn load_certificate(path: &Path) -> Result<Certificate, TrustError> {
    let der = read_pem(path, CERTIFICATE_LABEL)?;
    Certificate::from_der(der).map_err(|reason| TrustError::Decode {
        path: path.to_path_buf(),
        reason,
    })
}

/// Dotted OID from the AlgorithmIdentifier of a PKCS#8 PrivateKeyInfo.
fn pkcs8_algorithm(der: &[u8]) -> Result<String, String> {
    let (_, info) = parse_der(der).map_err(|e| e.to_string())?;
    info.as_sequence()
        .ok()
        .and_then(|fields| fields.get(1))
        .and_then(|algorithm| algorithm.as_sequence().ok())
        .and_then(|algorithm| algorithm.first())
        .and_then(|oid| oid.as_oid().ok())
        .map(|oid| oid.to_id_string())
        .ok_or_else(|| "not a PKCS#8 PrivateKeyInfo".to_string())
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey, TrustError> {
    let mut der = read_pem(path, PKCS8_LABEL)?;
    let key = match pkcs8_algorithm(&der) {
        Ok(algorithm) if algorithm == RSA_ENCRYPTION_OID => {
            SigningKey::from_pkcs8(&der).map_err(|rejected| TrustError::Decode {
                path: path.to_path_buf(),
                reason: rejected.to_string(),
            })
        }
        Ok(algorithm) => Err(TrustError::UnsupportedKeyType {
            path: path.to_path_buf(),
            reason: format!("key algorithm {algorithm} is not RSA"),
        }),
        Err(reason) => Err(TrustError::Decode {
            path: path.to_path_buf(),
            reason,
        }),
    };
    der.zeroize();
    key
}

/// Certificates and key loaded once at startup and shared read-only afterwards.
#[derive(Debug)]
pub struct TrustMaterial {
    pub issuer: Certificate,
    pub responder: Certificate,
    pub signing_key: SigningKey,
}

impl TrustMaterial {
    pub fn load(issuer: &Path, responder: &Path, key: &Path) -> Result<Self, TrustError> {
        let issuer_cert = load_certificate(issuer)?;
        let responder_cert = load_certificate(responder)?;
        let signing_key = load_signing_key(key)?;
        if signing_key.public_key() != responder_cert.public_key.as_slice() {
            return Err(TrustError::KeyMismatch {
                path: key.to_path_buf(),
            });
        }
        let trust = TrustMaterial {
            issuer: issuer_cert,
            responder: responder_cert,
            signing_key,
        };
        if !trust.responder_is_issuer() && !trust.responder.has_ocsp_signing() {
            warn!(
                "Responder certificate {} has no OCSP signing extended key usage, clients will reject its responses.",
                trust.responder.subject()
            );
        }
        info!(
            "Answering for issuer {} as {}",
            trust.issuer.subject(),
            trust.responder.subject()
        );
        Ok(trust)
    }

    pub fn responder_is_issuer(&self) -> bool {
        self.responder.der() == self.issuer.der()
    }
}
