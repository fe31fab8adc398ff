//! Request filters installed by the context and the connector.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

/// Character encoding in effect for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEncoding(pub String);

/// Give requests that do not declare a charset the configured one.
///
/// A `charset` parameter is appended to content types lacking one, and the
/// effective encoding is published as a [`RequestEncoding`] extension.
pub async fn character_encoding_filter(
    State(encoding): State<Arc<str>>,
    mut request: Request,
    next: Next,
) -> Response {
    let declared = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| (v.to_string(), charset_of(v)));

    let effective = match declared {
        Some((_, Some(charset))) => charset,
        Some((content_type, None)) => {
            let value = format!("{}; charset={}", content_type, encoding);
            if let Ok(value) = HeaderValue::from_str(&value) {
                request.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            encoding.to_string()
        }
        None => encoding.to_string(),
    };

    request.extensions_mut().insert(RequestEncoding(effective));
    next.run(request).await
}

/// Strip `Accept-Encoding` for user agents that must not get compressed
/// responses. Installed outside the compression layer.
pub async fn compression_opt_out_filter(
    State(agents): State<Arc<[String]>>,
    mut request: Request,
    next: Next,
) -> Response {
    let excluded = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| user_agent_excluded(ua, &agents))
        .unwrap_or(false);

    if excluded {
        request.headers_mut().remove(header::ACCEPT_ENCODING);
    }
    next.run(request).await
}

/// Case-insensitive substring match against the exclusion list.
pub fn user_agent_excluded(user_agent: &str, agents: &[String]) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    agents
        .iter()
        .filter(|a| !a.is_empty())
        .any(|a| ua.contains(&a.to_ascii_lowercase()))
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}
