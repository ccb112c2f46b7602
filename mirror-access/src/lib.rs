//! Wildcard allow/deny gating for GitHub and Docker image references.

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad pattern {0:?}")]
    BadPattern(String),
}

/// A single compiled `*`/`?` wildcard pattern, anchored and
/// case-insensitive. `*` matches any run of characters including `/`
/// (deliberate: `a/*` matches `a/b/c`).
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Result<Self, Error> {
        let mut re = String::with_capacity(pattern.len() + 8);
        re.push_str("(?i)^");
        for c in pattern.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c if regex_syntax::is_meta_character(c) => {
                    re.push('\\');
                    re.push(c);
                }
                c => re.push(c),
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|_| Error::BadPattern(pattern.to_string()))?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

/// An allow-list or deny-list of compiled patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternList(Vec<Pattern>);

impl PatternList {
    pub fn compile(patterns: &[String]) -> Result<Self, Error> {
        let compiled = patterns
            .iter()
            .map(|p| Pattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(compiled))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.0.iter().any(|p| p.is_match(subject))
    }
}

/// Why a subject was denied, for logging and the JSON error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotInAllowList,
    InDenyList,
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::NotInAllowList => "not in allow list",
            Denial::InDenyList => "in deny list",
        }
    }
}

/// An allow/deny pair. Empty allow means allow-all; deny is always checked.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    allow: PatternList,
    deny: PatternList,
}

impl Gate {
    pub fn new(allow: PatternList, deny: PatternList) -> Self {
        Self { allow, deny }
    }

    pub fn check(&self, subject: &str) -> Result<(), Denial> {
        if !self.allow.is_empty() && !self.allow.matches(subject) {
            return Err(Denial::NotInAllowList);
        }
        if self.deny.matches(subject) {
            return Err(Denial::InDenyList);
        }
        Ok(())
    }
}

/// The two independent allow/deny pairs the proxy enforces: one for GitHub
/// `owner/repo` subjects, one for Docker image references.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub github: Gate,
    pub docker: Gate,
}

impl AccessPolicy {
    pub fn check_github(&self, owner_repo: &str) -> Result<(), Denial> {
        let subject = owner_repo.strip_suffix(".git").unwrap_or(owner_repo);
        self.github.check(subject)
    }

    pub fn check_docker(&self, image_ref: &str) -> Result<(), Denial> {
        self.docker.check(image_ref)
    }
}

// regex itself has no public "is this char a metacharacter" helper, so we
// keep a tiny local table instead of pulling in regex-syntax as a real
// dependency.
mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '^' | '$' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(patterns: &[&str]) -> PatternList {
        PatternList::compile(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn star_matches_slashes() {
        let p = Pattern::compile("a/*").unwrap();
        assert!(p.is_match("a/b"));
        assert!(p.is_match("a/b/c"));
        assert!(!p.is_match("x/b"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let p = Pattern::compile("a/?").unwrap();
        assert!(p.is_match("a/b"));
        assert!(!p.is_match("a/bb"));
    }

    #[test]
    fn case_insensitive() {
        let p = Pattern::compile("Owner/Repo").unwrap();
        assert!(p.is_match("owner/repo"));
    }

    #[test]
    fn metacharacters_are_escaped() {
        let p = Pattern::compile("a.b").unwrap();
        assert!(p.is_match("a.b"));
        assert!(!p.is_match("aXb"));
    }

    #[test]
    fn empty_allow_list_allows_all() {
        let gate = Gate::new(PatternList::default(), list(&["evil/*"]));
        assert!(gate.check("anyone/anything").is_ok());
        assert_eq!(gate.check("evil/repo").unwrap_err(), Denial::InDenyList);
    }

    #[test]
    fn nonempty_allow_list_gates() {
        let gate = Gate::new(list(&["good/*"]), PatternList::default());
        assert!(gate.check("good/repo").is_ok());
        assert_eq!(
            gate.check("bad/repo").unwrap_err(),
            Denial::NotInAllowList
        );
    }

    #[test]
    fn github_subject_strips_dot_git() {
        let policy = AccessPolicy {
            github: Gate::new(list(&["octocat/hello-world"]), PatternList::default()),
            docker: Gate::default(),
        };
        assert!(policy.check_github("octocat/hello-world.git").is_ok());
    }

    #[test]
    fn docker_subject_includes_registry_host() {
        let policy = AccessPolicy {
            github: Gate::default(),
            docker: Gate::new(list(&["ghcr.io/user/*"]), PatternList::default()),
        };
        assert!(policy.check_docker("ghcr.io/user/image").is_ok());
        assert!(policy.check_docker("quay.io/user/image").is_err());
    }
}
