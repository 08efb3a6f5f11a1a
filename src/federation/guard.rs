//! Outbound request guard
//!
//! Remote actor fetches and deliveries only go to public http(s) hosts,
//! unless the deployment explicitly allows private addresses.

use std::net::IpAddr;

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_end_matches('.')
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Why a resolved host was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The lookup itself failed; may succeed later
    Lookup(String),
    /// The name points at an internal address
    NonPublic(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lookup(reason) | Self::NonPublic(reason) => f.write_str(reason),
        }
    }
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), ResolveError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| ResolveError::Lookup(format!("failed to resolve {}: {}", normalized, e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(ResolveError::NonPublic(format!(
                "{} resolves to a non-public address",
                normalized
            )));
        }
    }

    if !resolved_any {
        return Err(ResolveError::Lookup(format!("no DNS records for {}", normalized)));
    }

    Ok(())
}

/// Parse `raw` and check its shape: http(s) scheme, a host, and unless
/// `allow_private` is set, no literal loopback or private address.
///
/// Failures here are permanent; nothing is resolved.
pub fn check_url_shape(raw: &str, allow_private: bool) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid URL {}: {}", raw, e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(format!("unsupported URL scheme: {}", scheme)),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| format!("missing host in URL {}", raw))?;

    if !allow_private && is_disallowed_host(host) {
        return Err(format!("refusing non-public host {}", host));
    }

    Ok(parsed)
}

/// Resolve the host of an already shape-checked URL and refuse internal
/// addresses.
pub async fn check_resolved_host(url: &url::Url) -> Result<(), ResolveError> {
    let host = url
        .host_str()
        .ok_or_else(|| ResolveError::NonPublic(format!("missing host in URL {}", url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ResolveError::NonPublic(format!("missing port in URL {}", url)))?;
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    validate_resolved_host_ips(bare_host, port).await
}

/// Shape check plus, unless `allow_private`, DNS resolution.
pub async fn check_remote_url(raw: &str, allow_private: bool) -> Result<url::Url, String> {
    let parsed = check_url_shape(raw, allow_private)?;
    if !allow_private {
        check_resolved_host(&parsed).await.map_err(|e| e.to_string())?;
    }
    Ok(parsed)
}

/// Redirect hops followed before giving up
const MAX_REDIRECTS: usize = 5;

/// Redirect policy for the federation client.
///
/// Every hop is shape-checked again, so a public host cannot bounce a
/// request to loopback or a private literal address.
pub fn redirect_policy(allow_private: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {} redirects", MAX_REDIRECTS));
        }
        match check_url_shape(attempt.url().as_str(), allow_private) {
            Ok(_) => attempt.follow(),
            Err(reason) => {
                tracing::warn!(target_url = %attempt.url(), %reason, "Refusing redirect");
                attempt.error(reason)
            }
        }
    })
}

/// Lowercased host of a URL, if it has one.
pub fn url_host(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}
