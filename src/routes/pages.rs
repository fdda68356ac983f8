use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn render(title: &str, message: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><main class=\"notice\"><h1>{title}</h1><p>{message}</p></main></body></html>",
        title = escape(title),
        message = escape(message),
    ))
}

/// In-page notice shown to learners instead of a raw error status.
pub fn notice(message: &str) -> Response {
    (StatusCode::OK, render("Exam", message)).into_response()
}

pub fn expired_link() -> Response {
    (
        StatusCode::FORBIDDEN,
        render(
            "Link expired",
            "This exam link has expired or was already used. Please open the exam again from your course.",
        ),
    )
        .into_response()
}
