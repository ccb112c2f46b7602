//! Streaming GitHub/Hugging Face proxy: manual redirect-chain following so
//! content-type gating and install-script rewriting can happen on every
//! hop, which an auto-following client would hide.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use log::warn;
use mirror_access::{AccessPolicy, Denial};
use once_cell::sync::Lazy;
use regex::Regex;

const REDIRECT_CAP: u32 = 20;

const HOP_HEADERS: &[&str] = &[
    "connection",
    "host",
    "transfer-encoding",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

const BROWSER_POLICY_HEADERS: &[&str] = &[
    "content-security-policy",
    "referrer-policy",
    "strict-transport-security",
];

const BLOCKED_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "text/xml",
    "application/xml",
];

fn is_dropped_response_header(name: &HeaderName) -> bool {
    HOP_HEADERS.contains(&name.as_str()) || BROWSER_POLICY_HEADERS.contains(&name.as_str())
}

static SCRIPT_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:github\.com|raw\.githubusercontent\.com)/\S+").unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no recognised upstream for this path")]
    ClassifyMiss,
    #[error("access denied: {}", .0.reason())]
    AccessDenied(Denial),
    #[error("content type is not proxied")]
    ContentBlocked,
    #[error("response exceeds the configured size limit")]
    TooLarge,
    #[error("too many redirects")]
    RedirectLoop,
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Either the whole body buffered in memory (script rewrite path) or the
/// live upstream response, which the caller streams through.
pub enum ResponseBody {
    Buffered(Bytes),
    Stream(reqwest::Response),
}

pub struct ProxyOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

pub struct Client {
    http: reqwest::Client,
}

impl Client {
    pub fn new() -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http })
    }

    pub async fn proxy(
        &self,
        raw_path: &str,
        method: Method,
        client_headers: &HeaderMap,
        body: Bytes,
        access: &AccessPolicy,
        file_size_limit: u64,
        proxy_base: &str,
    ) -> Result<ProxyOutcome, Error> {
        let normalized = mirror_classify::normalize_raw_path(raw_path);
        let classification =
            mirror_classify::classify_github(&normalized).ok_or(Error::ClassifyMiss)?;
        access
            .check_github(&classification.subject)
            .map_err(Error::AccessDenied)?;

        let resp = self
            .walk_redirects(classification.url, method, client_headers, body)
            .await?;

        if method == Method::GET && resp.status().is_success() {
            check_content_gate(resp.headers(), file_size_limit)?;
        }

        let status = resp.status();
        let mut headers = HeaderMap::new();
        for (name, value) in resp.headers().iter() {
            if is_dropped_response_header(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if ends_with_script_extension(raw_path) {
            let body = resp.bytes().await?;
            let rewritten = rewrite_script_urls(&body, proxy_base);
            headers.remove(http::header::CONTENT_LENGTH);
            Ok(ProxyOutcome {
                status,
                headers,
                body: ResponseBody::Buffered(Bytes::from(rewritten)),
            })
        } else {
            Ok(ProxyOutcome {
                status,
                headers,
                body: ResponseBody::Stream(resp),
            })
        }
    }

    async fn walk_redirects(
        &self,
        mut url: String,
        method: Method,
        client_headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, Error> {
        let mut hops = 0u32;
        loop {
            let mut req = self.http.request(method.clone(), &url);
            for (name, value) in client_headers.iter() {
                if is_hop_request_header(name) {
                    continue;
                }
                req = req.header(name, value);
            }
            if !body.is_empty() {
                req = req.body(body.clone());
            }
            let resp = req.send().await?;

            if resp.status().is_redirection() {
                if let Some(location) = resp.headers().get(http::header::LOCATION) {
                    hops += 1;
                    if hops > REDIRECT_CAP {
                        return Err(Error::RedirectLoop);
                    }
                    url = resolve_location(&url, location.to_str().unwrap_or_default());
                    continue;
                }
            }
            return Ok(resp);
        }
    }
}

fn is_hop_request_header(name: &HeaderName) -> bool {
    HOP_HEADERS.contains(&name.as_str())
}

fn resolve_location(current: &str, location: &str) -> String {
    match url::Url::parse(current).and_then(|base| base.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}

fn check_content_gate(headers: &HeaderMap, file_size_limit: u64) -> Result<(), Error> {
    if let Some(ct) = headers.get(http::header::CONTENT_TYPE) {
        if let Ok(ct_str) = ct.to_str() {
            let primary = ct_str.split(';').next().unwrap_or(ct_str).trim().to_lowercase();
            if BLOCKED_CONTENT_TYPES.contains(&primary.as_str()) {
                return Err(Error::ContentBlocked);
            }
        }
    }
    if let Some(len) = headers.get(http::header::CONTENT_LENGTH) {
        if let Some(len) = len.to_str().ok().and_then(|s| s.parse::<u64>().ok()) {
            if len > file_size_limit {
                warn!("upstream content-length {len} exceeds limit {file_size_limit}");
                return Err(Error::TooLarge);
            }
        }
    }
    Ok(())
}

fn ends_with_script_extension(raw_path: &str) -> bool {
    let path = raw_path.split(['?', '#']).next().unwrap_or(raw_path);
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".sh") || lower.ends_with(".ps1")
}

fn rewrite_script_urls(body: &[u8], proxy_base: &str) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(body) else {
        return body.to_vec();
    };
    SCRIPT_URL_RE
        .replace_all(text, |caps: &regex::Captures| format!("{proxy_base}/{}", &caps[0]))
        .into_owned()
        .into_bytes()
}

/// Derives the externally-visible proxy root from forwarded headers,
/// falling back to `Host` and defaulting the scheme to `https`.
pub fn derive_proxy_base(
    forwarded_host: Option<&str>,
    host_header: Option<&str>,
    forwarded_proto: Option<&str>,
) -> String {
    let host = forwarded_host.or(host_header).unwrap_or("");
    let proto = forwarded_proto.unwrap_or("https");
    format!("{proto}://{host}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_extension_detection() {
        assert!(ends_with_script_extension("/owner/repo/install.sh"));
        assert!(ends_with_script_extension("/owner/repo/install.SH?x=1"));
        assert!(ends_with_script_extension("/a/b/setup.ps1"));
        assert!(!ends_with_script_extension("/a/b/README.md"));
    }

    #[test]
    fn rewrites_embedded_urls() {
        let body = b"curl -sSL https://raw.githubusercontent.com/owner/repo/main/install.sh | sh";
        let out = rewrite_script_urls(body, "https://mirror.example.com");
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("https://mirror.example.com/https://raw.githubusercontent.com/owner/repo/main/install.sh"));
    }

    #[test]
    fn content_gate_blocks_html() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        assert!(matches!(check_content_gate(&headers, 1_000_000), Err(Error::ContentBlocked)));
    }

    #[test]
    fn content_gate_allows_octet_stream() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        assert!(check_content_gate(&headers, 1_000_000).is_ok());
    }

    #[test]
    fn content_gate_enforces_size_cap() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("2000000"));
        assert!(matches!(check_content_gate(&headers, 1_000_000), Err(Error::TooLarge)));
    }

    #[test]
    fn proxy_base_prefers_forwarded_headers() {
        assert_eq!(
            derive_proxy_base(Some("mirror.example.com"), Some("localhost"), Some("http")),
            "http://mirror.example.com"
        );
        assert_eq!(
            derive_proxy_base(None, Some("localhost:8080"), None),
            "https://localhost:8080"
        );
    }

    #[test]
    fn relative_location_resolves_against_current_url() {
        let resolved = resolve_location(
            "https://github.com/owner/repo/releases/download/v1/x.tar.gz",
            "/owner/repo/releases/download/v1/x.tar.gz.alt",
        );
        assert_eq!(
            resolved,
            "https://github.com/owner/repo/releases/download/v1/x.tar.gz.alt"
        );
    }
}
