// src/http.rs

/// Request methods as they appear on the wire. Only `GET` is ever
/// accepted; the rest exist so an unsupported method parses cleanly into
/// a bad-request response instead of a scan failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        if b.eq_ignore_ascii_case(b"GET") {
            Method::Get
        } else if b.eq_ignore_ascii_case(b"POST") {
            Method::Post
        } else if b.eq_ignore_ascii_case(b"PUT") {
            Method::Put
        } else if b.eq_ignore_ascii_case(b"DELETE") {
            Method::Delete
        } else if b.eq_ignore_ascii_case(b"PATCH") {
            Method::Patch
        } else if b.eq_ignore_ascii_case(b"HEAD") {
            Method::Head
        } else if b.eq_ignore_ascii_case(b"OPTIONS") {
            Method::Options
        } else if b.eq_ignore_ascii_case(b"TRACE") {
            Method::Trace
        } else if b.eq_ignore_ascii_case(b"CONNECT") {
            Method::Connect
        } else {
            Method::Unknown
        }
    }
}

pub fn status_title(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Error",
    }
}

/// Fixed human-readable bodies for generated error responses.
pub fn error_body(status: u16) -> &'static [u8] {
    match status {
        400 => b"Your request has bad syntax or is inherently impossible to satisfy.\n",
        403 => b"You do not have permission to get file from this server.\n",
        404 => b"The requested file was not found on this server.\n",
        _ => b"There was an unusual problem serving the requested file.\n",
    }
}

/// Content type from the target's file extension. `text/html` when the
/// name carries no extension, and for generated responses.
pub fn mime_type(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => return "text/html",
    };
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "text/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "text/html",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_is_case_insensitive() {
        assert_eq!(Method::from_bytes(b"GET"), Method::Get);
        assert_eq!(Method::from_bytes(b"get"), Method::Get);
        assert_eq!(Method::from_bytes(b"gEt"), Method::Get);
        assert_eq!(Method::from_bytes(b"BREW"), Method::Unknown);
    }

    #[test]
    fn mime_lookup() {
        assert_eq!(mime_type("/index.html"), "text/html");
        assert_eq!(mime_type("/assets/app.JS"), "application/javascript");
        assert_eq!(mime_type("/logo.png"), "image/png");
        // No extension, and dotted directories don't confuse the lookup.
        assert_eq!(mime_type("/plain"), "text/html");
        assert_eq!(mime_type("/v1.2/readme"), "text/html");
    }
}
