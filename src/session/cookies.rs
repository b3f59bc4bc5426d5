//! Client-side cookie storage.
//!
//! The jar stands in for a browser's cookie store: the transport sends its
//! contents with every request and records `Set-Cookie` headers from every
//! response. Cookies are keyed by name only; the guard talks to a single
//! backend origin.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use http::header::SET_COOKIE;
use http::HeaderMap;

/// Shared, concurrently writable cookie store.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Arc<DashMap<String, String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the jar from `name=value` pairs separated by `;`.
    pub fn seed(&self, raw: &str) {
        for (name, value) in parse_pairs(raw) {
            self.insert(name, value);
        }
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) {
        self.cookies.remove(name);
    }

    /// Value of the cookie named exactly `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookie_string()
            .and_then(|cookies| read_cookie(&cookies, name).map(str::to_string))
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// All cookies as a `Cookie` header value, or `None` when empty.
    /// Names are sorted so the output is stable.
    pub fn cookie_string(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<(String, String)> = self
            .cookies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        pairs.sort();

        Some(
            pairs
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Seed the jar from a file of `name=value` lines.
    pub fn load_file(&self, path: &Path) -> io::Result<()> {
        let content = fs::read_to_string(path)?;
        for line in content.lines() {
            self.seed(line);
        }
        Ok(())
    }

    /// Write the jar as `name=value` lines, readable by [`CookieJar::load_file`].
    pub fn save_file(&self, path: &Path) -> io::Result<()> {
        let content: String = self
            .cookie_string()
            .map(|cookies| cookies.split("; ").map(|pair| format!("{pair}\n")).collect())
            .unwrap_or_default();
        fs::write(path, content)
    }

    /// Record every `Set-Cookie` header. A cookie with `Max-Age=0` or an
    /// empty value is removed.
    pub fn store_set_cookies(&self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            let mut parts = raw.split(';');
            let Some((name, value)) = parts.next().and_then(split_pair) else {
                continue;
            };
            let expired = parts.any(|attr| {
                attr.trim()
                    .split_once('=')
                    .is_some_and(|(k, v)| k.trim().eq_ignore_ascii_case("max-age") && v.trim() == "0")
            });

            if expired || value.is_empty() {
                tracing::trace!(cookie = %name, "Cookie removed");
                self.remove(name);
            } else {
                tracing::trace!(cookie = %name, "Cookie stored");
                self.insert(name, value);
            }
        }
    }
}

/// Find `name` in a `name=value; name2=value2` string by exact key match.
pub fn read_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    parse_pairs(cookies)
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn parse_pairs(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';').filter_map(split_pair)
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (name, value) = pair.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some((name, value.trim()))
    }
}
