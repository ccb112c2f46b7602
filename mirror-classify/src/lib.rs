//! Recognises which upstream a request belongs to and decomposes its path.
//!
//! Two independent jobs live here: classifying a GitHub/Hugging Face/asset
//! URL against the ordered pattern table in the design notes, and splitting
//! a Registry v2 path into image/kind/reference.

use once_cell::sync::Lazy;
use regex::Regex;

/// One entry in the GitHub-family recognition table. `rewrite` is applied
/// to the matched URL before it is dispatched upstream (used for the single
/// `/blob/` → `/raw/` rewrite).
struct Rule {
    regex: Regex,
    rewrite_blob_to_raw: bool,
}

fn rule(pattern: &str, rewrite_blob_to_raw: bool) -> Rule {
    Rule {
        regex: Regex::new(pattern).expect("static pattern"),
        rewrite_blob_to_raw,
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            r"(?i)^https?://github\.com/([^/]+)/([^/]+)/(?:releases|archive)/",
            false,
        ),
        rule(
            r"(?i)^https?://github\.com/([^/]+)/([^/]+)/(?:blob|raw)/",
            true,
        ),
        rule(
            r"(?i)^https?://github\.com/([^/]+)/([^/]+)/(?:info/refs|git-upload-pack|git-receive-pack)",
            false,
        ),
        rule(
            r"(?i)^https?://raw\.githubusercontent\.com/([^/]+)/([^/]+)/",
            false,
        ),
        rule(r"(?i)^https?://raw\.github\.com/([^/]+)/([^/]+)/", false),
        rule(
            r"(?i)^https?://gist\.github(?:usercontent)?\.com/([^/]+)/([^/]+)",
            false,
        ),
        rule(
            r"(?i)^https?://api\.github\.com/repos/([^/]+)/([^/]+)/",
            false,
        ),
        rule(
            r"(?i)^https?://huggingface\.co/(?:spaces/)?([^/]+)/([^/]+)",
            false,
        ),
        rule(
            r"(?i)^https?://cdn-lfs\.hf\.co/(?:spaces/)?([^/]+)/([^/]+)",
            false,
        ),
        rule(
            r"(?i)^https?://download\.docker\.com/([^/]+)/.+\.(?:tgz|zip)$",
            false,
        ),
        rule(
            r"(?i)^https?://github\.githubassets\.com/([^/]+)/",
            false,
        ),
        rule(
            r"(?i)^https?://opengraph\.githubassets\.com/([^/]+)/",
            false,
        ),
    ]
});

/// The result of matching `rawPath` against the GitHub-family table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Subject fed to the GitHub access gate, e.g. `owner/repo`. For
    /// single-capture rules (asset CDNs) this is just that one segment.
    pub subject: String,
    /// The URL to dispatch upstream, after the blob→raw rewrite if
    /// applicable.
    pub url: String,
}

/// Normalises a raw request path into an absolute URL: trims duplicate
/// leading slashes and prepends `https://` if the string has no scheme.
pub fn normalize_raw_path(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Matches `url` (already normalised by [`normalize_raw_path`]) against the
/// GitHub-family table. Returns `None` if no rule matches, which the
/// caller must turn into a `403`.
pub fn classify_github(url: &str) -> Option<Classification> {
    for r in RULES.iter() {
        if let Some(caps) = r.regex.captures(url) {
            let subject = match (caps.get(1), caps.get(2)) {
                (Some(a), Some(b)) => format!("{}/{}", a.as_str(), b.as_str()),
                (Some(a), None) => a.as_str().to_string(),
                _ => continue,
            };
            let out_url = if r.rewrite_blob_to_raw {
                url.replacen("/blob/", "/raw/", 1)
            } else {
                url.to_string()
            };
            return Some(Classification {
                subject,
                url: out_url,
            });
        }
    }
    None
}

/// The kind of Registry v2 resource a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    Manifests,
    Blobs,
    Tags,
    Base,
}

/// The decomposed form of a `/v2/...` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRegistryPath {
    pub registry_host: Option<String>,
    pub image_name: String,
    pub api_kind: ApiKind,
    pub reference: String,
}

/// Classifies the portion of the request path after `/v2/`. `known_hosts`
/// is the set of configured registry hosts (e.g. `ghcr.io`, `quay.io`)
/// whose name may prefix `image_name`; matching is case-insensitive.
pub fn classify_registry_path(path_after_v2: &str, known_hosts: &[String]) -> ParsedRegistryPath {
    let trimmed = path_after_v2.trim_matches('/');
    if trimmed.is_empty() {
        return ParsedRegistryPath {
            registry_host: None,
            image_name: String::new(),
            api_kind: ApiKind::Base,
            reference: String::new(),
        };
    }

    let mut segments: Vec<&str> = trimmed.split('/').collect();

    let registry_host = segments.first().and_then(|first| {
        known_hosts
            .iter()
            .find(|h| h.eq_ignore_ascii_case(first))
            .cloned()
    });
    if registry_host.is_some() {
        segments.remove(0);
    }

    let (api_kind, reference, image_segments): (ApiKind, String, &[&str]) = match segments.as_slice() {
        [.., "manifests", reference] if segments.len() >= 2 => {
            (ApiKind::Manifests, reference.to_string(), &segments[..segments.len() - 2])
        }
        [.., "blobs", reference] if segments.len() >= 2 => {
            (ApiKind::Blobs, reference.to_string(), &segments[..segments.len() - 2])
        }
        [.., "tags", "list"] if segments.len() >= 2 => {
            (ApiKind::Tags, String::new(), &segments[..segments.len() - 2])
        }
        _ => (ApiKind::Base, String::new(), segments.as_slice()),
    };

    let mut image_name = image_segments.join("/");
    if registry_host.is_none() && !image_name.is_empty() && !image_name.contains('/') {
        image_name = format!("library/{image_name}");
    }

    ParsedRegistryPath {
        registry_host,
        image_name,
        api_kind,
        reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_missing_scheme() {
        assert_eq!(
            normalize_raw_path("github.com/a/b/releases/"),
            "https://github.com/a/b/releases/"
        );
        assert_eq!(
            normalize_raw_path("//github.com/a/b/releases/"),
            "https://github.com/a/b/releases/"
        );
        assert_eq!(
            normalize_raw_path("http://github.com/a/b"),
            "http://github.com/a/b"
        );
    }

    #[test]
    fn classifies_github_release() {
        let c = classify_github("https://github.com/owner/repo/releases/download/v1/x.tar.gz").unwrap();
        assert_eq!(c.subject, "owner/repo");
    }

    #[test]
    fn blob_is_rewritten_to_raw() {
        let c = classify_github("https://github.com/owner/repo/blob/main/README.md").unwrap();
        assert_eq!(c.subject, "owner/repo");
        assert!(c.url.contains("/raw/main/README.md"));
        assert!(!c.url.contains("/blob/"));
    }

    #[test]
    fn classifies_raw_githubusercontent() {
        let c = classify_github("https://raw.githubusercontent.com/owner/repo/main/x.sh").unwrap();
        assert_eq!(c.subject, "owner/repo");
    }

    #[test]
    fn classifies_huggingface() {
        let c = classify_github("https://huggingface.co/owner/model/resolve/main/model.bin").unwrap();
        assert_eq!(c.subject, "owner/model");
        let c = classify_github("https://huggingface.co/spaces/owner/space").unwrap();
        assert_eq!(c.subject, "owner/space");
    }

    #[test]
    fn classifies_docker_download() {
        let c = classify_github("https://download.docker.com/linux/static/stable/x86_64/docker-24.0.tgz").unwrap();
        assert_eq!(c.subject, "linux");
    }

    #[test]
    fn no_match_is_none() {
        assert!(classify_github("https://example.com/owner/repo").is_none());
    }

    #[test]
    fn registry_path_manifests() {
        let known = vec!["ghcr.io".to_string(), "quay.io".to_string()];
        let p = classify_registry_path("library/alpine/manifests/latest", &known);
        assert_eq!(p.registry_host, None);
        assert_eq!(p.image_name, "library/alpine");
        assert_eq!(p.api_kind, ApiKind::Manifests);
        assert_eq!(p.reference, "latest");
    }

    #[test]
    fn registry_path_unscoped_hub_image_gets_library_prefix() {
        let known = vec!["ghcr.io".to_string()];
        let p = classify_registry_path("alpine/manifests/latest", &known);
        assert_eq!(p.image_name, "library/alpine");
    }

    #[test]
    fn registry_path_strips_known_host_prefix() {
        let known = vec!["ghcr.io".to_string()];
        let p = classify_registry_path("ghcr.io/user/image/blobs/sha256:abc", &known);
        assert_eq!(p.registry_host, Some("ghcr.io".to_string()));
        assert_eq!(p.image_name, "user/image");
        assert_eq!(p.api_kind, ApiKind::Blobs);
        assert_eq!(p.reference, "sha256:abc");
    }

    #[test]
    fn registry_path_tags_list() {
        let known = vec!["ghcr.io".to_string()];
        let p = classify_registry_path("ghcr.io/user/image/tags/list", &known);
        assert_eq!(p.api_kind, ApiKind::Tags);
        assert_eq!(p.reference, "");
        assert_eq!(p.image_name, "user/image");
    }

    #[test]
    fn registry_path_base_probe() {
        let known: Vec<String> = vec![];
        let p = classify_registry_path("", &known);
        assert_eq!(p.api_kind, ApiKind::Base);
        assert_eq!(p.image_name, "");
    }

    #[test]
    fn registry_host_match_is_case_insensitive() {
        let known = vec!["GHCR.io".to_string()];
        let p = classify_registry_path("ghcr.io/user/image/tags/list", &known);
        assert_eq!(p.registry_host, Some("GHCR.io".to_string()));
    }
}
