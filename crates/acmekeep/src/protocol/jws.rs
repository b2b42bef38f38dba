//! JWS envelope for signed ACME requests
//!
//! Flattened JSON serialization with the account JWK and the replay nonce in
//! the protected header.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::key::{AccountKey, EcJwk, JWS_ALGORITHM};

/// Protected header of every signed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub alg: String,
    pub jwk: EcJwk,
    pub nonce: String,
}

/// Wire payload (`Content-Type: application/jose+json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Request body with the ACME `resource` discriminator in front
#[derive(Serialize)]
struct ResourceBody<'a, T: Serialize> {
    resource: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

/// Wrap `body` as `{"resource": resource, ...body}` and sign it
pub fn sign_request<T: Serialize>(
    key: &AccountKey,
    nonce: &str,
    resource: &str,
    body: &T,
) -> Result<FlattenedJws, serde_json::Error> {
    let payload = serde_json::to_vec(&ResourceBody { resource, body })?;

    let header = ProtectedHeader {
        alg: JWS_ALGORITHM.to_string(),
        jwk: key.jwk(),
        nonce: nonce.to_string(),
    };
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload = URL_SAFE_NO_PAD.encode(payload);

    let signing_input = format!("{protected}.{payload}");
    let signature = URL_SAFE_NO_PAD.encode(key.sign(signing_input.as_bytes()));

    Ok(FlattenedJws {
        protected,
        payload,
        signature,
    })
}
