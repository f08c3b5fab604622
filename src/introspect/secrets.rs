use regex::Regex;

use crate::config::TokenPattern;

const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("Telegram bot tokens", r"^\d{8,10}:[A-Za-z0-9_-]{30,35}$"),
    ("leak api tokens", r"^\d{8,10}:[A-Za-z0-9_-]{8}$"),
];

/// Named regex classifier for string leaves.
#[derive(Debug, Clone)]
pub struct SecretMatcher {
    patterns: Vec<(String, Regex)>,
}

impl SecretMatcher {
    pub fn builtin() -> Self {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| compile(name, pattern))
            .collect();
        Self { patterns }
    }

    /// Built-in patterns followed by configured ones. Patterns that fail to
    /// compile are logged and left out.
    pub fn with_extra(extra: &[TokenPattern]) -> Self {
        let mut matcher = Self::builtin();
        matcher
            .patterns
            .extend(extra.iter().filter_map(|p| compile(&p.name, &p.pattern)));
        matcher
    }

    /// Pattern names in reporting order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(name, _)| name.as_str())
    }

    /// Names of every pattern `text` matches.
    pub fn classify<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl Default for SecretMatcher {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compile(name: &str, pattern: &str) -> Option<(String, Regex)> {
    match Regex::new(pattern) {
        Ok(re) => Some((name.to_string(), re)),
        Err(e) => {
            tracing::warn!("Skipping token pattern '{}': {}", name, e);
            None
        }
    }
}
