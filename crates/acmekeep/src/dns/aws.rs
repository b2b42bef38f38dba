//! Route53 REST API client
//!
//! Requests are signed with AWS Signature Version 4 using the credentials of
//! the standard `AWS_*` environment variables. Request and response bodies
//! are XML.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ChangeBatch, ChangeInfo, ChangeStatus, HostedZone, HostedZoneApi, HostedZonePage};
use crate::error::DnsProviderError;

type HmacSha256 = Hmac<Sha256>;

pub const ROUTE53_ENDPOINT: &str = "https://route53.amazonaws.com";

/// Route53 is a global service signed against `us-east-1`
const SIGNING_REGION: &str = "us-east-1";
const SERVICE: &str = "route53";
const API_VERSION: &str = "2013-04-01";
const XMLNS: &str = "https://route53.amazonaws.com/doc/2013-04-01/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

// ============================================================================
// Credentials and signing
// ============================================================================

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Present for temporary (STS) credentials
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("session_token", &self.session_token.is_some())
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self, DnsProviderError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DnsProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(DnsProviderError::MissingCredentials { name })
        };

        Ok(Self {
            access_key_id: required(ENV_ACCESS_KEY_ID)?,
            secret_access_key: required(ENV_SECRET_ACCESS_KEY)?,
            session_token: lookup(ENV_SESSION_TOKEN).filter(|v| !v.is_empty()),
        })
    }
}

/// Signature Version 4 signer for one region and service
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

/// Request parts covered by the signature
pub struct SignableRequest<'a> {
    pub method: &'a str,
    /// Unencoded absolute path
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    /// Every header to sign; `host` and `x-amz-date` are expected
    pub headers: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

impl SigV4Signer {
    pub fn new(credentials: AwsCredentials, region: &str, service: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    pub fn credentials(&self) -> &AwsCredentials {
        &self.credentials
    }

    /// `Authorization` header value for `request` signed at `time`
    pub fn sign(
        &self,
        request: &SignableRequest<'_>,
        time: DateTime<Utc>,
    ) -> Result<String, DnsProviderError> {
        let amz_date = amz_date(time);
        let date = time.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);

        let (canonical, signed_headers) = canonical_request(request);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );

        let key = self.signing_key(&date)?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id
        ))
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>, DnsProviderError> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let key = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
        let key = hmac_sha256(&key, self.region.as_bytes())?;
        let key = hmac_sha256(&key, self.service.as_bytes())?;
        hmac_sha256(&key, b"aws4_request")
    }
}

fn amz_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, DnsProviderError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| DnsProviderError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Canonical request and its signed header list
fn canonical_request(request: &SignableRequest<'_>) -> (String, String) {
    let mut query: Vec<(String, String)> = request
        .query
        .iter()
        .map(|(k, v)| (uri_encode(k, false), uri_encode(v, false)))
        .collect();
    query.sort();
    let query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut headers: Vec<(String, &str)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n{query}\n{canonical_headers}\n{signed_headers}\n{}",
        request.method,
        uri_encode(request.path, true),
        hex::encode(Sha256::digest(request.payload))
    );
    (canonical, signed_headers)
}

/// RFC 3986 encoding; `/` is kept in paths
fn uri_encode(value: &str, keep_slash: bool) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(char::from(byte))
            }
            b'/' if keep_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

// ============================================================================
// Client
// ============================================================================

/// [`HostedZoneApi`] over the Route53 REST API
pub struct Route53Client {
    http: reqwest::Client,
    endpoint: String,
    signer: SigV4Signer,
}

impl fmt::Debug for Route53Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route53Client")
            .field("endpoint", &self.endpoint)
            .field("credentials", self.signer.credentials())
            .finish_non_exhaustive()
    }
}

impl Route53Client {
    pub fn new(credentials: AwsCredentials) -> Result<Self, DnsProviderError> {
        Self::with_endpoint(credentials, ROUTE53_ENDPOINT)
    }

    pub fn with_endpoint(
        credentials: AwsCredentials,
        endpoint: impl Into<String>,
    ) -> Result<Self, DnsProviderError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("acmekeep/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            signer: SigV4Signer::new(credentials, SIGNING_REGION, SERVICE),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<String, DnsProviderError> {
        let url = url::Url::parse(&format!("{}{path}", self.endpoint))
            .map_err(|e| DnsProviderError::Response(format!("invalid endpoint: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => {
                return Err(DnsProviderError::Response(format!(
                    "endpoint {} has no host",
                    self.endpoint
                )))
            }
        };

        let now = Utc::now();
        let amz_date = amz_date(now);
        let payload = body.as_deref().unwrap_or_default();

        let mut headers = vec![("host", host.as_str()), ("x-amz-date", amz_date.as_str())];
        if let Some(token) = self.signer.credentials().session_token.as_deref() {
            headers.push(("x-amz-security-token", token));
        }
        let authorization = self.signer.sign(
            &SignableRequest {
                method: method.as_str(),
                path,
                query,
                headers: &headers,
                payload: payload.as_bytes(),
            },
            now,
        )?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .query(query)
            .header("x-amz-date", &amz_date)
            .header(AUTHORIZATION, authorization);
        if let Some(token) = self.signer.credentials().session_token.as_deref() {
            request = request.header("x-amz-security-token", token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/xml").body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(method = %method, path = %path, status = %status, "Route53 response");

        if !status.is_success() {
            return Err(provider_error(status, &text));
        }
        Ok(text)
    }
}

#[async_trait]
impl HostedZoneApi for Route53Client {
    async fn list_hosted_zones(
        &self,
        marker: Option<&str>,
    ) -> Result<HostedZonePage, DnsProviderError> {
        let mut query = Vec::new();
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let path = format!("/{API_VERSION}/hostedzone");
        let text = self.send(Method::GET, &path, &query, None).await?;
        let response: ListHostedZonesXml = parse_xml(&text)?;

        Ok(HostedZonePage {
            zones: response
                .hosted_zones
                .zones
                .into_iter()
                .map(|zone| HostedZone {
                    id: zone.id,
                    name: zone.name,
                })
                .collect(),
            next_marker: if response.is_truncated {
                response.next_marker
            } else {
                None
            },
        })
    }

    async fn change_resource_record_sets(
        &self,
        zone_id: &str,
        batch: &ChangeBatch,
    ) -> Result<ChangeInfo, DnsProviderError> {
        let path = format!("/{API_VERSION}/hostedzone/{}/rrset", bare_id(zone_id));
        let body = change_request_xml(batch)?;

        let text = self.send(Method::POST, &path, &[], Some(body)).await?;
        parse_change_info(&text)
    }

    async fn get_change(&self, change_id: &str) -> Result<ChangeInfo, DnsProviderError> {
        let path = format!("/{API_VERSION}/change/{}", bare_id(change_id));
        let text = self.send(Method::GET, &path, &[], None).await?;
        parse_change_info(&text)
    }
}

/// `Z123` from `/hostedzone/Z123`, `C456` from `/change/C456`
fn bare_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

// ============================================================================
// XML bodies
// ============================================================================

fn parse_xml<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, DnsProviderError> {
    quick_xml::de::from_str(text).map_err(|e| DnsProviderError::Response(e.to_string()))
}

fn provider_error(status: StatusCode, body: &str) -> DnsProviderError {
    let message = match parse_xml::<ErrorResponseXml>(body) {
        Ok(response) => format!(
            "{status}: {} ({})",
            response.error.message, response.error.code
        ),
        Err(_) => format!("{status}: {}", body.trim()),
    };
    DnsProviderError::Provider { message }
}

fn parse_change_info(text: &str) -> Result<ChangeInfo, DnsProviderError> {
    let response: ChangeInfoResponseXml = parse_xml(text)?;
    let status = match response.change_info.status.as_str() {
        "PENDING" => ChangeStatus::Pending,
        "INSYNC" => ChangeStatus::InSync,
        other => {
            return Err(DnsProviderError::Response(format!(
                "unknown change status '{other}'"
            )))
        }
    };

    Ok(ChangeInfo {
        id: response.change_info.id,
        status,
    })
}

fn change_request_xml(batch: &ChangeBatch) -> Result<String, DnsProviderError> {
    let request = ChangeRequestXml {
        xmlns: XMLNS,
        change_batch: ChangeBatchXml {
            comment: batch.comment.as_deref(),
            changes: ChangesXml {
                changes: batch
                    .changes
                    .iter()
                    .map(|change| ChangeXml {
                        action: change.action.as_str(),
                        resource_record_set: RecordSetXml {
                            name: &change.record_set.name,
                            record_type: &change.record_set.record_type,
                            ttl: change.record_set.ttl,
                            records: RecordsXml {
                                records: change
                                    .record_set
                                    .values
                                    .iter()
                                    .map(|value| RecordXml { value })
                                    .collect(),
                            },
                        },
                    })
                    .collect(),
            },
        },
    };

    quick_xml::se::to_string(&request).map_err(|e| DnsProviderError::Response(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListHostedZonesXml {
    #[serde(default)]
    hosted_zones: HostedZonesXml,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HostedZonesXml {
    #[serde(rename = "HostedZone", default)]
    zones: Vec<HostedZoneXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostedZoneXml {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeInfoResponseXml {
    change_info: ChangeInfoXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeInfoXml {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseXml {
    #[serde(rename = "Error")]
    error: ErrorXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorXml {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename = "ChangeResourceRecordSetsRequest")]
struct ChangeRequestXml<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "ChangeBatch")]
    change_batch: ChangeBatchXml<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeBatchXml<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    changes: ChangesXml<'a>,
}

#[derive(Serialize)]
struct ChangesXml<'a> {
    #[serde(rename = "Change")]
    changes: Vec<ChangeXml<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeXml<'a> {
    action: &'static str,
    resource_record_set: RecordSetXml<'a>,
}

#[derive(Serialize)]
struct RecordSetXml<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Type")]
    record_type: &'a str,
    #[serde(rename = "TTL")]
    ttl: u64,
    #[serde(rename = "ResourceRecords")]
    records: RecordsXml<'a>,
}

#[derive(Serialize)]
struct RecordsXml<'a> {
    #[serde(rename = "ResourceRecord")]
    records: Vec<RecordXml<'a>>,
}

#[derive(Serialize)]
struct RecordXml<'a> {
    #[serde(rename = "Value")]
    value: &'a str,
}
