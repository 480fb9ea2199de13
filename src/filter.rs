use std::fmt;

use crate::config::SyncConfig;

/// Why an item was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    TooLarge,
    ExtensionNotIncluded,
    ExtensionExcluded,
    PathNotIncluded,
    PatternExcluded,
    NoPatternMatch,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TooLarge => "too_large",
            RejectReason::ExtensionNotIncluded => "extension not in include list",
            RejectReason::ExtensionExcluded => "extension in exclude list",
            RejectReason::PathNotIncluded => "path not under an included prefix",
            RejectReason::PatternExcluded => "path matched an exclusion pattern",
            RejectReason::NoPatternMatch => "path matched no pattern",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(RejectReason),
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// Pure eligibility predicate over `(path, name, size)`. Stages run in
/// order: size cap, extension allow-list, extension deny-list, path-prefix
/// allow-list, then glob patterns (first match wins, `!` negates, no match
/// rejects when patterns are configured).
#[derive(Clone, Debug)]
pub struct SyncFilter {
    max_size_bytes: Option<i64>,
    include_extensions: Vec<String>,
    exclude_extensions: Vec<String>,
    include_paths: Vec<String>,
    path_patterns: Vec<String>,
}

impl SyncFilter {
    pub fn from_config(config: &SyncConfig) -> Self {
        let max_size_bytes = if config.max_file_size_mb == 0 {
            None
        } else {
            Some((config.max_file_size_mb as i64) * 1024 * 1024)
        };

        SyncFilter {
            max_size_bytes,
            include_extensions: normalize_extensions(&config.include_extensions),
            exclude_extensions: normalize_extensions(&config.exclude_extensions),
            include_paths: config
                .include_paths
                .iter()
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            path_patterns: config
                .path_patterns
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn evaluate(&self, path: &str, name: &str, size: Option<i64>) -> FilterDecision {
        if let (Some(max), Some(size)) = (self.max_size_bytes, size) {
            if size > max {
                return FilterDecision::Reject(RejectReason::TooLarge);
            }
        }

        let ext = extension_of(name);
        if !self.include_extensions.is_empty() {
            match &ext {
                Some(ext) if self.include_extensions.iter().any(|e| e == ext) => {}
                _ => return FilterDecision::Reject(RejectReason::ExtensionNotIncluded),
            }
        }
        if let Some(ext) = &ext {
            if self.exclude_extensions.iter().any(|e| e == ext) {
                return FilterDecision::Reject(RejectReason::ExtensionExcluded);
            }
        }

        if !self.include_paths.is_empty()
            && !self
                .include_paths
                .iter()
                .any(|prefix| path_has_prefix(path, prefix))
        {
            return FilterDecision::Reject(RejectReason::PathNotIncluded);
        }

        if !self.path_patterns.is_empty() {
            for pattern in &self.path_patterns {
                let (negated, pattern) = match pattern.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, pattern.as_str()),
                };
                if glob_match(pattern, path) {
                    return if negated {
                        FilterDecision::Reject(RejectReason::PatternExcluded)
                    } else {
                        FilterDecision::Accept
                    };
                }
            }
            return FilterDecision::Reject(RejectReason::NoPatternMatch);
        }

        FilterDecision::Accept
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Lowercased extension after the final dot, if any.
fn extension_of(name: &str) -> Option<String> {
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

/// Prefix match at a path boundary: `/a/b` covers `/a/b` and `/a/b/c`,
/// never `/a/bc`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Glob matching with `*` (within a segment), `**` (across segments) and
/// `?` (single non-separator character).
fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_bytes(pattern.as_bytes(), text.as_bytes())
}

fn glob_match_bytes(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }

    match pattern[0] {
        b'*' => {
            if pattern.len() > 1 && pattern[1] == b'*' {
                // `**` may consume anything, separators included
                let rest = &pattern[2..];
                // Also swallow a following '/' so "a/**/b" matches "a/b"
                let rest_after_slash = rest.strip_prefix(b"/").unwrap_or(rest);
                for skip in 0..=text.len() {
                    if glob_match_bytes(rest, &text[skip..])
                        || glob_match_bytes(rest_after_slash, &text[skip..])
                    {
                        return true;
                    }
                }
                false
            } else {
                let rest = &pattern[1..];
                for skip in 0..=text.len() {
                    if glob_match_bytes(rest, &text[skip..]) {
                        return true;
                    }
                    if skip < text.len() && text[skip] == b'/' {
                        break;
                    }
                }
                false
            }
        }
        b'?' => {
            !text.is_empty() && text[0] != b'/' && glob_match_bytes(&pattern[1..], &text[1..])
        }
        c => !text.is_empty() && text[0] == c && glob_match_bytes(&pattern[1..], &text[1..]),
    }
}
