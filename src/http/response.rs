//! Outgoing response assembly. Mirrors the request side: an owned,
//! serializable value rather than anything borrowed from a buffer.

use std::path::Path;

/// Full status line text table. Only the codes this server can actually
/// emit are listed; anything else falls back to a generic reason phrase.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if let Some(existing) = self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            existing.1 = value;
        } else {
            self.headers.push((name.to_string(), value));
        }
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.set_header("Content-Type", content_type);
        self.set_header("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    pub fn plain_text(status: u16, text: impl Into<String>) -> Self {
        let mut res = HttpResponse::new(status);
        res.set_body(text.into().into_bytes(), "text/plain; charset=utf-8");
        res
    }

    /// Canned error body used when no `error_handler` page is configured
    /// or the configured page cannot be read.
    pub fn canned_error(status: u16) -> Self {
        let body = format!("{} {}\n", status, reason_phrase(status));
        Self::plain_text(status, body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        let mut res = HttpResponse::new(status);
        res.set_header("Location", location);
        res.set_header("Content-Length", "0");
        res
    }

    /// Serializes the status line and headers only (used for HEAD
    /// responses and as the prefix ahead of a streamed body).
    pub fn head_bytes(&self, version: &str, date: &str, server_banner: &str) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            version,
            self.status,
            reason_phrase(self.status)
        )
        .into_bytes();
        out.extend_from_slice(format!("Date: {date}\r\n").as_bytes());
        out.extend_from_slice(format!("Server: {server_banner}\r\n").as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    pub fn to_bytes(&self, version: &str, date: &str, server_banner: &str) -> Vec<u8> {
        let mut out = self.head_bytes(version, date, server_banner);
        out.extend_from_slice(&self.body);
        out
    }
}

/// Directory listing HTML: alphabetically sorted, directories first, `..`
/// present unless `dir` is the document root itself.
pub fn generate_autoindex(dir: &Path, url_path: &str, is_document_root: bool) -> HttpResponse {
    let mut entries: Vec<(String, bool)> = Vec::new();
    if let Ok(read) = dir.read_dir() {
        for entry in read.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                entries.push((name, is_dir));
            }
        }
    }
    entries.sort_by(|a, b| match (a.1, b.1) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.0.cmp(&b.0),
    });

    let base = if url_path.ends_with('/') { url_path.to_string() } else { format!("{url_path}/") };

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html><head><title>Index of ");
    html.push_str(&escape_html(url_path));
    html.push_str("</title></head><body>\n<h1>Index of ");
    html.push_str(&escape_html(url_path));
    html.push_str("</h1>\n<ul>\n");
    if !is_document_root {
        html.push_str(&format!("<li><a href=\"{base}..\">../</a></li>\n"));
    }
    for (name, is_dir) in entries {
        let suffix = if is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<li><a href=\"{base}{name}{suffix}\">{name}{suffix}</a></li>\n",
            base = base,
            name = escape_html(&name),
            suffix = suffix,
        ));
    }
    html.push_str("</ul>\n</body></html>\n");

    let mut res = HttpResponse::new(200);
    res.set_body(html.into_bytes(), "text/html; charset=utf-8");
    res
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
