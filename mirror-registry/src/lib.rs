//! Docker Registry v2 proxy: bearer-token acquisition per auth dialect,
//! upstream dispatch, and `WWW-Authenticate` rewriting so clients loop
//! back through this proxy for re-auth.

use std::collections::HashMap;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use log::{trace, warn};
use mirror_classify::{ApiKind, ParsedRegistryPath};
use mirror_config::{AuthDialect, RegistryDescriptor};
use mirror_ttlcache::TtlCache;
use serde::Deserialize;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, application/vnd.docker.distribution.manifest.list.v2+json, application/vnd.oci.image.manifest.v1+json, application/vnd.oci.image.index.v1+json";

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

fn is_hop_header(name: &HeaderName) -> bool {
    HOP_HEADERS.contains(&name.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

type TokenCacheKey = (Option<String>, String);

/// Talks to one or more upstream registries, caching bearer tokens and
/// rewriting `WWW-Authenticate` so the client re-authenticates through us
/// instead of the origin.
pub struct Client {
    http: reqwest::Client,
    token_cache: TtlCache<TokenCacheKey, String>,
}

impl Client {
    pub fn new(token_cache_capacity: usize, default_ttl: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(20))
            .build()?;
        Ok(Self {
            http,
            token_cache: TtlCache::new(token_cache_capacity, default_ttl),
        })
    }

    /// Resolves a bearer token for `scope`, consulting the cache first.
    /// Returns `None` (not an error) on anonymous dialects or any upstream
    /// failure — the caller proceeds unauthenticated and relays whatever
    /// the origin answers.
    pub async fn bearer_token(
        &self,
        registry_host: Option<&str>,
        descriptor: Option<&RegistryDescriptor>,
        scope: &str,
    ) -> Option<String> {
        let dialect = descriptor.map(|d| d.auth_dialect).unwrap_or(AuthDialect::DockerHub);
        if dialect == AuthDialect::Anonymous {
            return None;
        }

        let cache_key: TokenCacheKey = (registry_host.map(str::to_string), scope.to_string());
        if let Some(token) = self.token_cache.get(&cache_key) {
            return Some(token);
        }

        let auth_url = match dialect {
            AuthDialect::DockerHub => {
                format!("https://auth.docker.io/token?service=registry.docker.io&scope={scope}")
            }
            AuthDialect::Github => format!("https://ghcr.io/token?scope={scope}"),
            AuthDialect::Google => format!("https://gcr.io/v2/token?scope={scope}"),
            AuthDialect::Quay => format!("https://quay.io/v2/auth?scope={scope}"),
            AuthDialect::Generic => {
                let host = descriptor
                    .and_then(|d| d.auth_host.clone())
                    .or_else(|| descriptor.map(|d| d.upstream.clone()))
                    .unwrap_or_default();
                format!("https://{host}?scope={scope}")
            }
            AuthDialect::Anonymous => unreachable!(),
        };

        let resp = match self.http.get(&auth_url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("token fetch to {auth_url} failed: {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            trace!("token fetch to {auth_url} returned {}", resp.status());
            return None;
        }
        let body: TokenResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!("token response from {auth_url} was not valid JSON: {e}");
                return None;
            }
        };
        let token = body.token.or(body.access_token)?;
        self.token_cache
            .set_with_ttl(cache_key, token.clone(), Duration::from_secs(15 * 60));
        Some(token)
    }

    /// Builds and sends the upstream request for a classified Registry
    /// path, attaching a bearer token when one is available.
    pub async fn dispatch(
        &self,
        registries: &HashMap<String, RegistryDescriptor>,
        parsed: &ParsedRegistryPath,
        method: Method,
        client_headers: &HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, Error> {
        let descriptor = parsed
            .registry_host
            .as_deref()
            .and_then(|h| registries.get(h));
        let upstream_host = descriptor
            .map(|d| d.upstream.clone())
            .or_else(|| parsed.registry_host.clone())
            .unwrap_or_else(|| "registry-1.docker.io".to_string());

        let path_suffix = match parsed.api_kind {
            ApiKind::Manifests => format!("/manifests/{}", parsed.reference),
            ApiKind::Blobs => format!("/blobs/{}", parsed.reference),
            ApiKind::Tags => "/tags/list".to_string(),
            ApiKind::Base => String::new(),
        };
        let target = if parsed.image_name.is_empty() {
            format!("https://{upstream_host}/v2/")
        } else {
            format!("https://{upstream_host}/v2/{}{path_suffix}", parsed.image_name)
        };

        let scope = format!("repository:{}:pull", parsed.image_name);
        let token = self
            .bearer_token(parsed.registry_host.as_deref(), descriptor, &scope)
            .await;

        let mut req = self.http.request(method, &target);
        for (name, value) in client_headers.iter() {
            if is_hop_header(name) {
                continue;
            }
            req = req.header(name, value);
        }
        if !client_headers.contains_key(http::header::ACCEPT) && parsed.api_kind == ApiKind::Manifests {
            req = req.header(http::header::ACCEPT, MANIFEST_ACCEPT);
        }
        if let Some(token) = &token {
            req = req.bearer_auth(token);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        req.send().await.map_err(Error::from)
    }

    /// Proxies `/token` and `/token/*`, appending `service=registry.docker.io`
    /// if the client didn't supply one.
    pub async fn proxy_token(&self, query_pairs: &[(String, String)]) -> Result<reqwest::Response, Error> {
        let mut pairs = query_pairs.to_vec();
        if !pairs.iter().any(|(k, _)| k == "service") {
            pairs.push(("service".to_string(), "registry.docker.io".to_string()));
        }
        self.http
            .get("https://auth.docker.io/token")
            .query(&pairs)
            .send()
            .await
            .map_err(Error::from)
    }
}

/// Copies upstream response headers for the client, dropping hop headers
/// and `WWW-Authenticate` (which is rewritten separately so the realm
/// points back at this proxy's `/token` endpoint).
pub fn copy_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if is_hop_header(name) || name == http::header::WWW_AUTHENTICATE {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Rewrites a `WWW-Authenticate: Bearer realm="...", service="...", scope="..."`
/// header so the client re-authenticates against `<scheme>://<host>/token`
/// instead of the origin's auth server. `service` and `scope` are preserved
/// verbatim.
pub fn rewrite_www_authenticate(
    value: &HeaderValue,
    client_scheme: &str,
    client_host: &str,
) -> Option<HeaderValue> {
    let input = value.to_str().ok()?;
    let parsed = parse_www_authenticate_bearer(input)?;
    let new_realm = format!("{client_scheme}://{client_host}/token");
    let mut parts = vec![format!("realm=\"{new_realm}\"")];
    if let Some(service) = parsed.service {
        parts.push(format!("service=\"{service}\""));
    }
    if let Some(scope) = parsed.scope {
        parts.push(format!("scope=\"{scope}\""));
    }
    HeaderValue::from_str(&format!("Bearer {}", parts.join(", "))).ok()
}

#[derive(Default, Debug, PartialEq, Eq)]
struct WwwAuthenticateBearer<'a> {
    realm: Option<&'a str>,
    service: Option<&'a str>,
    scope: Option<&'a str>,
}

fn parse_www_authenticate_bearer(input: &str) -> Option<WwwAuthenticateBearer<'_>> {
    use nom::{
        IResult, Parser,
        bytes::complete::{tag, take_until1},
        character::complete::{alpha1, char},
        multi::{many0, many1, separated_list0},
        sequence::{delimited, preceded, separated_pair, terminated},
    };
    fn parser(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        preceded(
            terminated(tag("Bearer"), many1(tag(" "))),
            separated_list0(
                terminated(tag(","), many0(tag(" "))),
                separated_pair(
                    alpha1,
                    tag("="),
                    delimited(char('"'), take_until1("\""), char('"')),
                ),
            ),
        )
        .parse(input)
    }
    let (_, matches) = parser(input).ok()?;
    let mut ret = WwwAuthenticateBearer::default();
    for (k, v) in matches {
        match k {
            "realm" => ret.realm = Some(v),
            "service" => ret.service = Some(v),
            "scope" => ret.scope = Some(v),
            _ => {}
        }
    }
    Some(ret)
}
