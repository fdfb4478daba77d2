//! Credential extraction from the WebSocket upgrade request.
//!
//! A controller proves itself with the session cookie its browser already
//! holds; a device appends the shared secret to the connect URL:
//!
//! ```text
//! GET /signaling HTTP/1.1            Cookie: connect.sid=s%3Aabc...   (controller)
//! GET /signaling?deviceAuth=secret   HTTP/1.1                         (device)
//! ```
//!
//! Only the presence and value of these two items matter here.  Whether the
//! values are any good is decided later by the authorization gate.
//!
//! Both values are URI-decoded: `%XX` escapes are resolved and everything
//! else, `+` included, is kept as sent.  Form decoding would turn a `+` in a
//! base64-style secret into a space.

use percent_encoding::percent_decode_str;
use relay_core::Credentials;

use crate::domain::RelayConfig;

/// Builds the connection's [`Credentials`] from the request's query string
/// and `Cookie` header values, using the credential names in `config`.
pub fn extract_credentials(
    query: Option<&str>,
    cookie_headers: &[&str],
    config: &RelayConfig,
) -> Credentials {
    let session = cookie_headers
        .iter()
        .find_map(|header| cookie_value(header, &config.session_cookie));
    let device = query.and_then(|q| query_value(q, &config.device_param));
    Credentials::new(session, device)
}

/// Returns the value of cookie `name` in a `Cookie` header, if present.
///
/// Surrounding double quotes are stripped and `%XX` escapes decoded, so a
/// `connect.sid=s%3Aabc` cookie yields `s:abc`.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() != name {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Some(uri_decode(value))
    })
}

/// Returns the value of query parameter `name`, if present.
///
/// The first `name=` pair wins.  A pair without `=` has an empty value.
pub fn query_value(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| uri_decode(value))
    })
}

/// Resolves `%XX` escapes.  A value whose escapes do not decode to UTF-8 is
/// kept as sent.
fn uri_decode(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
