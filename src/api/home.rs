//! Home page
//!
//! - GET / - follower list

use axum::{Router, extract::State, response::Html, routing::get};
use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::AppState;
use crate::error::AppError;

pub fn home_router() -> Router<AppState> {
    Router::new().route("/", get(home))
}

/// Wrap `body` in a minimal HTML document.
pub(super) fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        encode_text(title),
        body
    )
}

fn render_follower(uri: &str) -> String {
    let linkable = url::Url::parse(uri)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);

    if linkable {
        format!(
            "<li><a href=\"{}\" rel=\"nofollow noopener\">{}</a></li>",
            encode_double_quoted_attribute(uri),
            encode_text(uri)
        )
    } else {
        format!("<li>{}</li>", encode_text(uri))
    }
}

/// GET /
///
/// Lists each follower actor once, however many Follows it has on record.
async fn home(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let followers = state.followers.unique_actor_uris().await?;
    let handle = &state.config.actor.handle;

    let list = if followers.is_empty() {
        "<p>No followers yet.</p>".to_string()
    } else {
        let items: Vec<String> = followers.iter().map(|uri| render_follower(uri)).collect();
        format!("<ul>\n{}\n</ul>", items.join("\n"))
    };

    let body = format!(
        "<h1>@{}@{}</h1>\n<h2>Followers ({})</h2>\n{}",
        encode_text(handle),
        encode_text(&state.config.server.domain),
        followers.len(),
        list
    );

    Ok(Html(page(&state.config.actor.display_name, &body)))
}
