//! Shared HTTP utilities for the link gate workspace.
//!
//! Response bodies, cookie handling, HTML escaping and time formatting used
//! by gate-server. Nothing here depends on a particular web framework.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// JSON Response Helpers
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Link not found",
        "bad_request" => "Bad request",
        "invalid_token" => "Invalid link token",
        "validation" => "Missing or invalid fields",
        "payload_too_large" => "Upload too large",
        "storage" => "Image upload failed",
        "unavailable" => "Storage temporarily unavailable",
        "error" | "internal" => "Internal server error",
        _ => code,
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

// ============================================================================
// HTML
// ============================================================================

/// Escape text for interpolation into HTML bodies and quoted attributes.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Cookies
// ============================================================================

/// Find a cookie by name in a `Cookie` request header value.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.trim_matches('"').to_string())
    })
}

/// `Set-Cookie` value for a browser-session cookie (no expiry).
pub fn session_cookie(name: &str, value: &str) -> String {
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax")
}

/// `Set-Cookie` value that removes a cookie.
pub fn expired_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

// ============================================================================
// URL Building
// ============================================================================

/// Derive a public origin from a `Host` header when none is configured.
///
/// Loopback hosts get `http`, everything else `https`.
pub fn origin_from_host(host: &str) -> String {
    let bare = host.split(':').next().unwrap_or("");
    let scheme = if matches!(bare, "localhost" | "127.0.0.1" | "0.0.0.0") {
        "http"
    } else {
        "https"
    };
    format!("{scheme}://{host}")
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Milliseconds since the UNIX epoch, clamped at zero.
pub fn system_time_to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
