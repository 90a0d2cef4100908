//! Responses the proxy writes itself instead of forwarding.

use bytes::{BufMut, Bytes, BytesMut};
use http::StatusCode;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};

pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

fn status_line(status: StatusCode, reason: &str) -> String {
    format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason)
}

/// Informational page returned for plain HTTP requests.
pub fn info_page(request_line: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>SocketZero Proxy Demo</title></head>\n\
         <body>\n\
         \x20   <h1>🦝 SocketZero Proxy Works!</h1>\n\
         \x20   <p>This response came from your iPhone proxy.</p>\n\
         \x20   <p>Request: <code>{}</code></p>\n\
         \x20   <hr>\n\
         \x20   <p><em>In production, this would forward to SocketZero receiver.</em></p>\n\
         </body>\n\
         </html>",
        escape_html(request_line)
    )
}

/// Full `200 OK` response for a plain request. `Content-Length` counts
/// encoded bytes, not characters.
pub fn plain_http_response(request_line: &str) -> Bytes {
    let body = info_page(request_line);
    let status = StatusCode::OK;
    let reason = status.canonical_reason().unwrap_or("OK");

    let mut buf = BytesMut::with_capacity(body.len() + 128);
    buf.put_slice(status_line(status, reason).as_bytes());
    buf.put_slice(format!("{}: text/html\r\n", header_name(CONTENT_TYPE)).as_bytes());
    buf.put_slice(format!("{}: {}\r\n", header_name(CONTENT_LENGTH), body.len()).as_bytes());
    buf.put_slice(format!("{}: close\r\n", header_name(CONNECTION)).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

// http 크레이트는 소문자 이름을 쓰므로 표시용으로 변환
fn header_name(name: http::HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
