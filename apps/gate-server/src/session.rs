use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderValue};
use domain::SessionStore;

/// Session store over browser cookies.
///
/// Reads come from the request's `Cookie` header. Writes are queued as
/// `Set-Cookie` values and applied to the response with [`CookieSession::apply`].
/// Cookies carry no expiry, so they live as long as the browser session.
#[derive(Debug, Default)]
pub struct CookieSession {
    incoming: String,
    overrides: HashMap<String, Option<String>>,
    pending: Vec<String>,
}

impl CookieSession {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let incoming = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            incoming,
            ..Default::default()
        }
    }

    /// Append queued `Set-Cookie` headers.
    pub fn apply(self, headers: &mut HeaderMap) {
        for cookie in self.pending {
            if let Ok(v) = HeaderValue::from_str(&cookie) {
                headers.append(header::SET_COOKIE, v);
            }
        }
    }
}

impl SessionStore for CookieSession {
    fn get(&self, key: &str) -> Option<String> {
        match self.overrides.get(key) {
            Some(v) => v.clone(),
            None => http_common::cookie_value(&self.incoming, key),
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), Some(value.to_string()));
        self.pending.push(http_common::session_cookie(key, value));
    }

    fn remove(&mut self, key: &str) {
        self.overrides.insert(key.to_string(), None);
        self.pending.push(http_common::expired_cookie(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_request_cookies_and_queues_writes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; linkgate_clicked_x=true"));
        let mut s = CookieSession::from_headers(&headers);
        assert_eq!(s.get("linkgate_clicked_x").as_deref(), Some("true"));

        s.remove("linkgate_clicked_x");
        assert_eq!(s.get("linkgate_clicked_x"), None);
        s.set("b", "2");
        assert_eq!(s.get("b").as_deref(), Some("2"));

        let mut out = HeaderMap::new();
        s.apply(&mut out);
        let cookies: Vec<_> = out
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("linkgate_clicked_x=;"));
        assert!(cookies[0].contains("Max-Age=0"));
        assert_eq!(cookies[1], "b=2; Path=/; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn no_cookie_header_is_empty_session() {
        let s = CookieSession::from_headers(&HeaderMap::new());
        assert_eq!(s.get("anything"), None);
    }
}
