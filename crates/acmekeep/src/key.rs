//! Account and certificate key material
//!
//! The account key signs every protocol request and is bound to challenges
//! through the key authorization. Certificate keys are generated per Common
//! Name and only leave this module as a CSR or a stored encoding.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use p256::SecretKey;
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KeyError;

/// JWS algorithm of the account key
pub const JWS_ALGORITHM: &str = "ES256";

/// Public part of the account key as a JSON Web Key
///
/// Field order is the RFC 7638 thumbprint order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

/// ACME account key (ECDSA P-256)
#[derive(Clone)]
pub struct AccountKey {
    secret: SecretKey,
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}

impl AccountKey {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let secret =
            SecretKey::from_pkcs8_pem(pem).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(Self { secret })
    }

    pub fn from_jwk(jwk: &str) -> Result<Self, KeyError> {
        let secret = SecretKey::from_jwk_str(jwk).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(Self { secret })
    }

    /// PKCS#8 PEM encoding of the private key
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.secret
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| KeyError::Encoding(e.to_string()))
    }

    /// Private JWK encoding
    pub fn to_jwk(&self) -> String {
        self.secret.to_jwk_string().to_string()
    }

    /// Public JWK embedded in the protected header of every request
    pub fn jwk(&self) -> EcJwk {
        let point = self.secret.public_key().to_encoded_point(false);
        let coordinate = |c: Option<&p256::FieldBytes>| {
            c.map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
                .unwrap_or_default()
        };

        EcJwk {
            crv: "P-256".to_string(),
            kty: "EC".to_string(),
            x: coordinate(point.x()),
            y: coordinate(point.y()),
        }
    }

    /// RFC 7638 JWK thumbprint (base64url of the SHA-256 digest)
    pub fn thumbprint(&self) -> String {
        let jwk = self.jwk();
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            jwk.crv, jwk.kty, jwk.x, jwk.y
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// ES256 signature in the fixed-size `r || s` form JWS expects
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(data);
        signature.to_bytes().to_vec()
    }
}

/// Build the key authorization binding `token` to the account key
///
/// `token + "." + base64url(SHA-256 JWK thumbprint)`
pub fn build_key_authorization(token: &str, account_key: &AccountKey) -> String {
    format!("{}.{}", token, account_key.thumbprint())
}

/// TXT record value for a DNS-01 challenge
pub fn dns_challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// Private key of an issued certificate (ECDSA P-256)
///
/// Held as the PKCS#8 PEM produced at generation time so the stored bytes
/// survive a save/load cycle unchanged.
#[derive(Clone)]
pub struct CertKey {
    pem: String,
}

impl fmt::Debug for CertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertKey").finish_non_exhaustive()
    }
}

impl CertKey {
    pub fn generate() -> Result<Self, KeyError> {
        let key_pair = KeyPair::generate()?;
        Ok(Self {
            pem: key_pair.serialize_pem(),
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        // Validate before accepting
        KeyPair::from_pem(pem)?;
        Ok(Self {
            pem: pem.to_string(),
        })
    }

    pub fn from_jwk(jwk: &str) -> Result<Self, KeyError> {
        let secret = SecretKey::from_jwk_str(jwk).map_err(|e| KeyError::Encoding(e.to_string()))?;
        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(Self {
            pem: pem.to_string(),
        })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn to_jwk(&self) -> Result<String, KeyError> {
        let secret =
            SecretKey::from_pkcs8_pem(&self.pem).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(secret.to_jwk_string().to_string())
    }
}

/// DER-encoded CSR for `common_name` plus extra SANs
///
/// The Common Name is always the first SAN; duplicates are dropped.
pub fn create_certificate_request(
    key: &CertKey,
    common_name: &str,
    domains: &[String],
) -> Result<Vec<u8>, KeyError> {
    let key_pair = KeyPair::from_pem(key.pem())?;

    let mut names = vec![common_name.to_string()];
    for domain in domains {
        if !names.contains(domain) {
            names.push(domain.clone());
        }
    }

    let mut params = CertificateParams::new(names)?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);

    let csr = params.serialize_request(&key_pair)?;
    Ok(csr.der().to_vec())
}

/// PEM-encode one DER block (LF line endings)
pub fn encode_pem(label: &str, der: &[u8]) -> String {
    let block = pem::Pem::new(label, der);
    pem::encode_config(
        &block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}
