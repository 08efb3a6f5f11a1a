//! WebFinger protocol implementation
//!
//! Lets remote servers discover the local actor URI from `acct:` addresses.

use serde::{Deserialize, Serialize};

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Return the handle a WebFinger `resource` names, if it is on this server.
///
/// Accepts `acct:handle@domain` (case-insensitive domain, optional `acct:`)
/// and the actor URI itself.
pub fn local_handle_for_resource<'a>(resource: &'a str, domain: &str, base_url: &str) -> Option<&'a str> {
    let resource = resource.trim();
    let actor_prefix = format!("{}/users/", base_url.trim_end_matches('/'));
    if let Some(handle) = resource.strip_prefix(&actor_prefix) {
        return (!handle.is_empty() && !handle.contains('/')).then_some(handle);
    }

    let acct = match resource.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("acct:") => &resource[5..],
        _ => resource,
    };
    let (handle, host) = acct.trim_start_matches('@').split_once('@')?;
    (!handle.is_empty() && host.eq_ignore_ascii_case(domain)).then_some(handle)
}

/// Generate WebFinger response for a local account.
///
/// # Arguments
/// * `username` - Local username
/// * `domain` - Instance domain
/// * `base_url` - Instance base URL (includes protocol)
///
/// # Returns
/// JRD response for the account
pub fn generate_webfinger_response(username: &str, domain: &str, base_url: &str) -> WebFingerResponse {
    let subject = format!("acct:{}@{}", username, domain);
    let actor_url = format!("{}/users/{}", base_url.trim_end_matches('/'), username);

    WebFingerResponse {
        subject,
        aliases: Some(vec![actor_url.clone()]),
        links: vec![
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some(super::ACTIVITY_JSON.to_string()),
                href: Some(actor_url.clone()),
            },
            WebFingerLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_url),
            },
        ],
    }
}
