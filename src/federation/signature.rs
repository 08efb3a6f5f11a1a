//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use super::actor::{ActorResolver, strip_fragment};
use crate::error::AppError;
use crate::metrics::SIGNATURE_REJECTIONS;

const SUPPORTED_ALGORITHMS: [&str; 2] = ["rsa-sha256", "hs2019"];

/// Sign an HTTP request
///
/// Creates HTTP Signature header for outgoing requests.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key` - Signing key of the local actor
/// * `key_id` - Full URL to the public key (actor#main-key)
///
/// # Returns
/// Headers to add: Signature, Date, Digest (if body present). `host` is the
/// value the signature covers and includes a non-default port.
///
/// # Example
/// ```ignore
/// let headers = sign_request(
///     "POST",
///     "https://remote.server/inbox",
///     Some(&body),
///     key_pair.private_key(),
///     "https://my.server/users/me#main-key",
/// )?;
/// ```
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key: &RsaPrivateKey,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host_name = parsed_url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;
    let host = match parsed_url.port() {
        Some(port) => format!("{}:{}", host_name, port),
        None => host_name.to_string(),
    };

    let path_and_query = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let digest = body.map(generate_digest);

    let mut signing_parts = vec![
        format!("(request-target): {} {}", method.to_lowercase(), path_and_query),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
        host,
    })
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
    /// Host value covered by the signature
    pub host: String,
}

/// Inbound request as seen by the verifier
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    /// Path plus query string, as received
    pub path_and_query: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// Why an inbound signature was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("missing Signature header")]
    MissingSignature,
    #[error("malformed Signature header: {0}")]
    MalformedSignature(String),
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signed headers must include: {0}")]
    UnsignedHeader(&'static str),
    #[error("missing {0} header")]
    MissingHeader(String),
    #[error("invalid Date header")]
    InvalidDate,
    #[error("Date header outside allowed window ({0}s skew)")]
    DateSkew(i64),
    #[error("signature expired")]
    Expired,
    #[error("digest mismatch")]
    DigestMismatch,
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("signing key does not belong to the activity actor")]
    ActorMismatch,
    #[error("signature verification failed")]
    SignatureMismatch,
}

impl RejectReason {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingSignature => "missing_signature",
            RejectReason::MalformedSignature(_) => "malformed_signature",
            RejectReason::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            RejectReason::UnsignedHeader(_) => "unsigned_header",
            RejectReason::MissingHeader(_) => "missing_header",
            RejectReason::InvalidDate => "invalid_date",
            RejectReason::DateSkew(_) => "date_skew",
            RejectReason::Expired => "expired",
            RejectReason::DigestMismatch => "digest_mismatch",
            RejectReason::KeyUnavailable(_) => "key_unavailable",
            RejectReason::ActorMismatch => "actor_mismatch",
            RejectReason::SignatureMismatch => "signature_mismatch",
        }
    }

    /// HTTP-facing error for this rejection.
    pub fn into_error(self) -> AppError {
        match self {
            RejectReason::ActorMismatch => AppError::Forbidden,
            _ => AppError::Unauthorized,
        }
    }
}

/// Result of verifying an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The request was signed by this actor
    Verified(String),
    Rejected(RejectReason),
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    strip_fragment(key_id) == strip_fragment(actor_id)
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
    pub created: Option<i64>,
    pub expires: Option<i64>,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// A missing `algorithm` is read as `hs2019`; a missing `headers` as `date`.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;
    let mut created = None;
    let mut expires = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_ascii_lowercase()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                "created" => created = value.parse().ok(),
                "expires" => expires = value.parse().ok(),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?,
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature
            .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?,
        created,
        expires,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

fn digest_matches(header_value: &str, body: &[u8]) -> bool {
    let expected = generate_digest(body);
    let expected_hash = &expected["SHA-256=".len()..];

    header_value.split(',').any(|entry| {
        entry
            .trim()
            .split_once('=')
            .is_some_and(|(algorithm, hash)| {
                algorithm.eq_ignore_ascii_case("sha-256") && hash == expected_hash
            })
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String, RejectReason> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .map(|value| value.to_str().map(str::trim))
        .collect::<Result<_, _>>()
        .map_err(|_| RejectReason::MalformedSignature(format!("{} header is not ASCII", name)))?;

    if values.is_empty() {
        return Err(RejectReason::MissingHeader(name.to_string()));
    }
    Ok(values.join(", "))
}

/// Checks that need no key: header shape, algorithm, signed header set, Date
/// freshness and body digest.
fn preflight(
    request: &SignedRequest<'_>,
    max_skew_seconds: i64,
) -> Result<ParsedSignature, RejectReason> {
    let raw = match request.headers.get("signature") {
        Some(value) => value
            .to_str()
            .map_err(|_| RejectReason::MalformedSignature("not ASCII".to_string()))?,
        None => return Err(RejectReason::MissingSignature),
    };

    let parsed = parse_signature_header(raw)
        .map_err(|e| RejectReason::MalformedSignature(e.to_string()))?;

    if !SUPPORTED_ALGORITHMS.contains(&parsed.algorithm.as_str()) {
        return Err(RejectReason::UnsupportedAlgorithm(parsed.algorithm));
    }

    let mut required = vec!["(request-target)", "host", "date"];
    if !request.body.is_empty() {
        required.push("digest");
    }
    for name in required {
        if !parsed.headers.iter().any(|h| h == name) {
            return Err(RejectReason::UnsignedHeader(name));
        }
    }

    let date_str = header_value(request.headers, "date")?;
    let date = DateTime::parse_from_rfc2822(&date_str).map_err(|_| RejectReason::InvalidDate)?;
    let now = Utc::now().timestamp();
    let skew = (now - date.timestamp()).abs();
    if skew > max_skew_seconds {
        return Err(RejectReason::DateSkew(skew));
    }

    if parsed.expires.is_some_and(|expires| expires < now) {
        return Err(RejectReason::Expired);
    }

    if !request.body.is_empty() {
        let digest = header_value(request.headers, "digest")?;
        if !digest_matches(&digest, request.body) {
            return Err(RejectReason::DigestMismatch);
        }
    }

    Ok(parsed)
}

fn signing_string(
    request: &SignedRequest<'_>,
    parsed: &ParsedSignature,
) -> Result<String, RejectReason> {
    let mut signing_parts = Vec::with_capacity(parsed.headers.len());

    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!(
                "{} {}",
                request.method.to_lowercase(),
                request.path_and_query
            ),
            "(created)" => parsed
                .created
                .ok_or_else(|| RejectReason::MissingHeader("(created)".to_string()))?
                .to_string(),
            "(expires)" => parsed
                .expires
                .ok_or_else(|| RejectReason::MissingHeader("(expires)".to_string()))?
                .to_string(),
            name => header_value(request.headers, name)?,
        };

        signing_parts.push(format!("{}: {}", header_name, value));
    }

    Ok(signing_parts.join("\n"))
}

fn verify_rsa(public_key_pem: &str, message: &str, signature_b64: &str) -> Result<(), RejectReason> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| RejectReason::KeyUnavailable(format!("invalid public key: {}", e)))?;
    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);

    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| RejectReason::MalformedSignature("invalid signature encoding".to_string()))?;
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| RejectReason::SignatureMismatch)?;

    verifier
        .verify(message.as_bytes(), &signature)
        .map_err(|_| RejectReason::SignatureMismatch)
}

/// Verify an HTTP request signature against a known public key
///
/// # Returns
/// The parsed signature header when the request verifies.
pub fn verify_signature(
    request: &SignedRequest<'_>,
    public_key_pem: &str,
    max_skew_seconds: i64,
) -> Result<ParsedSignature, RejectReason> {
    let parsed = preflight(request, max_skew_seconds)?;
    let message = signing_string(request, &parsed)?;
    verify_rsa(public_key_pem, &message, &parsed.signature)?;
    Ok(parsed)
}

/// Signature verifier
///
/// Resolves the signing key through the actor resolver. A key that fails
/// against a cached document gets one fresh fetch, to follow key rotation.
pub struct SignatureVerifier {
    resolver: Arc<ActorResolver>,
    max_skew_seconds: i64,
}

impl SignatureVerifier {
    pub fn new(resolver: Arc<ActorResolver>, max_skew_seconds: i64) -> Self {
        Self {
            resolver,
            max_skew_seconds,
        }
    }

    /// Check that `request` was signed by `claimed_actor`.
    pub async fn verify(&self, request: &SignedRequest<'_>, claimed_actor: &str) -> Verification {
        match self.check(request, claimed_actor).await {
            Ok(actor) => Verification::Verified(actor),
            Err(reason) => {
                SIGNATURE_REJECTIONS
                    .with_label_values(&[reason.label()])
                    .inc();
                tracing::info!(actor = %claimed_actor, %reason, "Rejected inbound signature");
                Verification::Rejected(reason)
            }
        }
    }

    async fn check(
        &self,
        request: &SignedRequest<'_>,
        claimed_actor: &str,
    ) -> Result<String, RejectReason> {
        let parsed = preflight(request, self.max_skew_seconds)?;

        // Reject before fetching anything on behalf of a mismatched key.
        if !key_id_matches_actor(&parsed.key_id, claimed_actor) {
            return Err(RejectReason::ActorMismatch);
        }

        let message = signing_string(request, &parsed)?;

        let resolved = self
            .resolver
            .resolve_key(&parsed.key_id)
            .await
            .map_err(|e| RejectReason::KeyUnavailable(e.to_string()))?;

        if strip_fragment(&resolved.key.owner) != resolved.actor.id
            || resolved.actor.id != strip_fragment(claimed_actor)
        {
            return Err(RejectReason::ActorMismatch);
        }

        match verify_rsa(&resolved.key.public_key_pem, &message, &parsed.signature) {
            Ok(()) => Ok(resolved.actor.id.clone()),
            Err(RejectReason::SignatureMismatch) if !resolved.fetched => {
                tracing::debug!(key_id = %parsed.key_id, "Signature failed with cached key; refetching");
                self.resolver.invalidate(&resolved.actor.id).await;

                let fresh = self
                    .resolver
                    .resolve_key(&parsed.key_id)
                    .await
                    .map_err(|e| RejectReason::KeyUnavailable(e.to_string()))?;
                if fresh.key.public_key_pem == resolved.key.public_key_pem {
                    return Err(RejectReason::SignatureMismatch);
                }

                verify_rsa(&fresh.key.public_key_pem, &message, &parsed.signature)?;
                Ok(fresh.actor.id.clone())
            }
            Err(reason) => Err(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::data::{KeyStore, KvStore, MemoryStore};
    use crate::test_support::MockRemote;
    use axum::http::StatusCode;
    use http::HeaderValue;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    const INBOX_URL: &str = "https://local.example/users/me/inbox";
    const MAX_SKEW: i64 = 300;

    fn generate_test_keypair() -> (RsaPrivateKey, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .expect("public key pem");
        (private_key, public_key_pem)
    }

    fn build_signed_header_map(
        url: &str,
        body: &[u8],
        private_key: &RsaPrivateKey,
        key_id: &str,
    ) -> (HeaderMap, String) {
        let signed = sign_request("POST", url, Some(body), private_key, key_id).expect("signed");
        let parsed_url = url::Url::parse(url).expect("valid test url");
        let path_and_query = match parsed_url.query() {
            Some(query) => format!("{}?{}", parsed_url.path(), query),
            None => parsed_url.path().to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(&signed.host).expect("host header"));
        headers.insert("date", HeaderValue::from_str(&signed.date).expect("date header"));
        if let Some(digest) = signed.digest {
            headers.insert("digest", HeaderValue::from_str(&digest).expect("digest header"));
        }
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature header"),
        );

        (headers, path_and_query)
    }

    fn request<'a>(path: &'a str, headers: &'a HeaderMap, body: &'a [u8]) -> SignedRequest<'a> {
        SignedRequest {
            method: "POST",
            path_and_query: path,
            headers,
            body,
        }
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "https://remote.example/inbox?foo=bar",
            body,
            &private_key,
            "https://remote.example/users/alice#main-key",
        );

        let result = verify_signature(&request(&path, &headers, body), &public_key_pem, MAX_SKEW);
        assert!(result.is_ok(), "valid signature should verify: {result:?}");
    }

    #[test]
    fn sign_request_includes_non_default_port_in_host() {
        let (private_key, _) = generate_test_keypair();
        let signed = sign_request(
            "POST",
            "http://127.0.0.1:4567/inbox",
            Some(b"{}"),
            &private_key,
            "https://local.example/users/me#main-key",
        )
        .unwrap();
        assert_eq!(signed.host, "127.0.0.1:4567");

        let default_port = sign_request(
            "POST",
            "https://remote.example:443/inbox",
            Some(b"{}"),
            &private_key,
            "https://local.example/users/me#main-key",
        )
        .unwrap();
        assert_eq!(default_port.host, "remote.example");
    }

    #[test]
    fn verify_signature_rejects_tampered_body() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            INBOX_URL,
            body,
            &private_key,
            "https://remote.example/users/alice#main-key",
        );

        let tampered = br#"{"type":"Undo"}"#;
        assert_eq!(
            verify_signature(&request(&path, &headers, tampered), &public_key_pem, MAX_SKEW)
                .unwrap_err(),
            RejectReason::DigestMismatch
        );
    }

    #[test]
    fn verify_signature_rejects_missing_date_header() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            INBOX_URL,
            body,
            &private_key,
            "https://remote.example/users/alice#main-key",
        );
        headers.remove("date");

        assert_eq!(
            verify_signature(&request(&path, &headers, body), &public_key_pem, MAX_SKEW)
                .unwrap_err(),
            RejectReason::MissingHeader("date".to_string())
        );
    }

    #[test]
    fn verify_signature_rejects_stale_date() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            INBOX_URL,
            body,
            &private_key,
            "https://remote.example/users/alice#main-key",
        );
        headers.insert(
            "date",
            HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"),
        );

        assert!(matches!(
            verify_signature(&request(&path, &headers, body), &public_key_pem, MAX_SKEW),
            Err(RejectReason::DateSkew(_))
        ));
    }

    #[test]
    fn verify_signature_rejects_when_date_not_in_signed_headers() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            INBOX_URL,
            body,
            &private_key,
            "https://remote.example/users/alice#main-key",
        );

        let signature_header = headers
            .get("signature")
            .expect("signature")
            .to_str()
            .expect("signature str");
        let parsed = parse_signature_header(signature_header).expect("parsed signature");
        let tampered = format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"(request-target) host digest\",signature=\"{}\"",
            parsed.key_id, parsed.algorithm, parsed.signature
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&tampered).expect("tampered signature"),
        );

        assert_eq!(
            verify_signature(&request(&path, &headers, body), &public_key_pem, MAX_SKEW)
                .unwrap_err(),
            RejectReason::UnsignedHeader("date")
        );
    }

    #[test]
    fn verify_signature_rejects_unsupported_algorithm() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "signature",
            HeaderValue::from_static(
                "keyId=\"https://remote.example/users/alice#main-key\",algorithm=\"hmac-sha256\",headers=\"(request-target) host date\",signature=\"ZmFrZQ==\"",
            ),
        );

        assert_eq!(
            verify_signature(&request("/inbox", &headers, b""), "unused", MAX_SKEW).unwrap_err(),
            RejectReason::UnsupportedAlgorithm("hmac-sha256".to_string())
        );
    }

    #[test]
    fn verify_signature_rejects_signature_from_another_key() {
        let (private_key, _) = generate_test_keypair();
        let (_, other_public_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            INBOX_URL,
            body,
            &private_key,
            "https://remote.example/users/alice#main-key",
        );

        assert_eq!(
            verify_signature(&request(&path, &headers, body), &other_public_pem, MAX_SKEW)
                .unwrap_err(),
            RejectReason::SignatureMismatch
        );
    }

    #[test]
    fn verify_signature_covers_arbitrary_signed_headers() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let digest = generate_digest(body);

        let message = format!(
            "(request-target): post /inbox\nhost: local.example\ndate: {}\ndigest: {}\ncontent-type: application/activity+json",
            date, digest
        );
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
        let signature = signing_key.sign_with_rng(&mut rand::thread_rng(), message.as_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("local.example"));
        headers.insert("date", HeaderValue::from_str(&date).unwrap());
        headers.insert("digest", HeaderValue::from_str(&digest).unwrap());
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/activity+json"),
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&format!(
                "keyId=\"https://remote.example/users/alice#main-key\",algorithm=\"hs2019\",headers=\"(request-target) host date digest content-type\",signature=\"{}\"",
                BASE64.encode(signature.to_bytes())
            ))
            .unwrap(),
        );

        assert!(verify_signature(&request("/inbox", &headers, body), &public_key_pem, MAX_SKEW).is_ok());
    }

    #[test]
    fn digest_header_may_list_several_algorithms() {
        let body = b"hello";
        let header = format!("SHA-512=abc,{}", generate_digest(body));
        assert!(digest_matches(&header, body));
        assert!(!digest_matches("SHA-512=abc", body));
    }

    #[test]
    fn parse_signature_header_defaults_algorithm_and_headers() {
        let parsed = parse_signature_header(
            "keyId=\"https://remote.example/users/alice#main-key\",signature=\"ZmFrZQ==\"",
        )
        .unwrap();
        assert_eq!(parsed.algorithm, "hs2019");
        assert_eq!(parsed.headers, vec!["date".to_string()]);
    }

    #[test]
    fn key_id_matches_actor_accepts_same_actor() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/alice#main-key",
            "https://remote.example/users/alice",
        ));
    }

    #[test]
    fn key_id_matches_actor_rejects_different_actor() {
        assert!(!key_id_matches_actor(
            "https://remote.example/users/bob#main-key",
            "https://remote.example/users/alice",
        ));
    }

    fn create_test_verifier() -> SignatureVerifier {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let config = Arc::new(valid_config());
        let resolver = Arc::new(ActorResolver::new(
            config,
            Arc::new(KeyStore::new(kv, 1024)),
            Arc::new(reqwest::Client::new()),
        ));
        SignatureVerifier::new(resolver, MAX_SKEW)
    }

    #[tokio::test]
    async fn verifier_accepts_request_signed_by_remote_actor() {
        let remote = MockRemote::spawn(StatusCode::ACCEPTED).await;
        let verifier = create_test_verifier();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map(INBOX_URL, body, remote.private_key(), &remote.key_id());

        let verification = verifier
            .verify(&request(&path, &headers, body), &remote.actor_uri())
            .await;
        assert_eq!(verification, Verification::Verified(remote.actor_uri()));
    }

    #[tokio::test]
    async fn verifier_rejects_key_of_another_actor_without_fetching() {
        let remote = MockRemote::spawn(StatusCode::ACCEPTED).await;
        let verifier = create_test_verifier();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map(INBOX_URL, body, remote.private_key(), &remote.key_id());

        let verification = verifier
            .verify(
                &request(&path, &headers, body),
                "https://elsewhere.example/users/mallory",
            )
            .await;
        assert_eq!(verification, Verification::Rejected(RejectReason::ActorMismatch));
        assert_eq!(remote.actor_fetches(), 0);
    }

    #[tokio::test]
    async fn verifier_refetches_once_after_remote_key_rotation() {
        let mut remote = MockRemote::spawn(StatusCode::ACCEPTED).await;
        let verifier = create_test_verifier();
        let body = br#"{"type":"Follow"}"#;

        let (headers, path) =
            build_signed_header_map(INBOX_URL, body, remote.private_key(), &remote.key_id());
        assert!(matches!(
            verifier.verify(&request(&path, &headers, body), &remote.actor_uri()).await,
            Verification::Verified(_)
        ));

        remote.rotate_key();
        let (headers, path) =
            build_signed_header_map(INBOX_URL, body, remote.private_key(), &remote.key_id());
        assert!(matches!(
            verifier.verify(&request(&path, &headers, body), &remote.actor_uri()).await,
            Verification::Verified(_)
        ));
        assert_eq!(remote.actor_fetches(), 2);
    }

    #[tokio::test]
    async fn verifier_does_not_refetch_freshly_fetched_key() {
        let remote = MockRemote::spawn(StatusCode::ACCEPTED).await;
        let verifier = create_test_verifier();
        let (forger_key, _) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map(INBOX_URL, body, &forger_key, &remote.key_id());

        let verification = verifier
            .verify(&request(&path, &headers, body), &remote.actor_uri())
            .await;
        assert_eq!(
            verification,
            Verification::Rejected(RejectReason::SignatureMismatch)
        );
        assert_eq!(remote.actor_fetches(), 1);
    }

    #[tokio::test]
    async fn verifier_reports_unreachable_key_owner() {
        let verifier = create_test_verifier();
        let (private_key, _) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let key_id = "http://127.0.0.1:9/users/ghost#main-key";
        let (headers, path) = build_signed_header_map(INBOX_URL, body, &private_key, key_id);

        assert!(matches!(
            verifier
                .verify(&request(&path, &headers, body), "http://127.0.0.1:9/users/ghost")
                .await,
            Verification::Rejected(RejectReason::KeyUnavailable(_))
        ));
    }
}
