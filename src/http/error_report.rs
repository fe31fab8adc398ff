//! Error responses generated by the container itself.
//!
//! Application handlers build their own responses. These pages are only used
//! when the container answers on its own: unmapped paths, rejected methods,
//! failed or rejected worker tasks.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::ErrorReportStyle;

/// Build an error response in the configured style.
pub fn error_response(style: ErrorReportStyle, status: StatusCode, detail: Option<&str>) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");

    let (body, content_type) = match style {
        ErrorReportStyle::Html => {
            let detail = detail
                .map(|d| format!("<p>{}</p>", escape_html(d)))
                .unwrap_or_default();
            (
                Body::from(format!(
                    "<!doctype html><html><head><title>{code} {reason}</title></head>\
                     <body><h1>HTTP Status {code} - {reason}</h1>{detail}</body></html>",
                    code = status.as_u16(),
                    reason = reason,
                    detail = detail,
                )),
                Some("text/html; charset=utf-8"),
            )
        }
        ErrorReportStyle::Plain => {
            let text = match detail {
                Some(d) => format!("{} {}: {}\n", status.as_u16(), reason, d),
                None => format!("{} {}\n", status.as_u16(), reason),
            };
            (Body::from(text), Some("text/plain; charset=utf-8"))
        }
        ErrorReportStyle::None => (Body::empty(), None),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_page_carries_status() {
        let response = error_response(ErrorReportStyle::Html, StatusCode::NOT_FOUND, Some("/missing"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn none_style_has_no_body_type() {
        let response = error_response(ErrorReportStyle::None, StatusCode::INTERNAL_SERVER_ERROR, None);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn detail_is_escaped() {
        assert_eq!(escape_html("<a href=\"x\">"), "&lt;a href=&quot;x&quot;&gt;");
    }
}
