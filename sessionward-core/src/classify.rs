//! Public/protected endpoint classification.
//!
//! A request target is public when its normalized pathname contains any
//! configured fragment. Matching is case-insensitive and unanchored, so
//! `course/courses/` also matches `api/course/courses/12/`. Classification
//! never fails: a target that cannot be resolved as a URL is matched as a
//! raw path instead.

use url::Url;

#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    base: Url,
    /// Lowercased, non-empty, in configuration order.
    public: Vec<String>,
}

impl EndpointClassifier {
    pub fn new<I, S>(base: Url, public_fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let public = public_fragments
            .into_iter()
            .map(|f| f.as_ref().trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        Self { base, public }
    }

    /// The configured base.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// The public fragments, lowercased.
    pub fn public_fragments(&self) -> &[String] {
        &self.public
    }

    /// Resolve `target` against the base. Absolute `http(s)` targets are kept as-is.
    pub fn resolve(&self, target: &str) -> Result<Url, url::ParseError> {
        resolve_target(target, &self.base)
    }

    /// Whether `target` must be sent without credentials.
    pub fn is_public(&self, target: &str) -> bool {
        let path = normalized_path(target, &self.base).to_lowercase();
        let matched = self.public.iter().find(|f| path.contains(f.as_str()));
        match matched {
            Some(fragment) => {
                tracing::debug!("{} is public (matched {})", path, fragment);
                true
            }
            None => false,
        }
    }
}

fn resolve_target(target: &str, base: &Url) -> Result<Url, url::ParseError> {
    let trimmed = target.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(trimmed)
    } else {
        base.join(trimmed.trim_start_matches('/'))
    }
}

/// Pathname of `target` resolved against `base`, without leading slashes.
///
/// Falls back to the raw target (leading slashes stripped) when it cannot be
/// resolved.
pub fn normalized_path(target: &str, base: &Url) -> String {
    match resolve_target(target, base) {
        Ok(url) => url.path().trim_start_matches('/').to_string(),
        Err(e) => {
            tracing::debug!("Classifying unresolvable target {:?} as raw path: {}", target, e);
            target.trim().trim_start_matches('/').to_string()
        }
    }
}
