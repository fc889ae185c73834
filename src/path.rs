//! Path validation and glob-like path-pattern matching (spec.md §3, §9).
//!
//! A path is an absolute, slash-separated string beginning with `/`. A path
//! ending in `/` denotes a directory. A path *pattern* is a glob expression:
//! `*` matches exactly one path segment, `**` matches zero or more segments,
//! and a comma separates independent alternative patterns — a path matches
//! the whole pattern if it matches any alternative.

use crate::errors::{CoreError, CoreResult};

/// Validate that `path` is an absolute, slash-separated path with no `..`
/// segment and no empty segment (`//`).
pub fn validate_path(path: &str) -> CoreResult<()> {
    if !path.starts_with('/') {
        return Err(CoreError::InvalidPath(format!(
            "path must start with '/': {path}"
        )));
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    for segment in trimmed.split('/').skip(1) {
        if segment.is_empty() {
            return Err(CoreError::InvalidPath(format!(
                "path contains an empty segment: {path}"
            )));
        }
        if segment == ".." || segment == "." {
            return Err(CoreError::InvalidPath(format!(
                "path contains a relative segment: {path}"
            )));
        }
    }
    Ok(())
}

/// True if `path` denotes a directory (ends in `/`).
pub fn is_directory_path(path: &str) -> bool {
    path.ends_with('/') && path != "/"
}

/// Split a path into its non-empty segments, ignoring a trailing slash.
fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed.split('/').filter(|s| !s.is_empty()).collect()
}

/// A compiled glob-like path pattern: one or more comma-separated
/// alternatives, each a sequence of literal/`*`/`**` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    alternatives: Vec<Vec<Segment>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,   // *
    AnyDepth, // **
}

impl PathPattern {
    /// Parse a pattern string. An empty pattern normalizes to `/**`
    /// (match everything).
    pub fn parse(pattern: &str) -> Self {
        let normalized = Self::normalize(pattern);
        let alternatives = normalized
            .split(',')
            .map(|alt| {
                segments(alt)
                    .into_iter()
                    .map(|s| match s {
                        "**" => Segment::AnyDepth,
                        "*" => Segment::Single,
                        other => Segment::Literal(other.to_string()),
                    })
                    .collect()
            })
            .collect();
        PathPattern {
            raw: normalized,
            alternatives,
        }
    }

    fn normalize(pattern: &str) -> String {
        if pattern.is_empty() {
            return "/**".to_string();
        }
        if pattern.starts_with("**") {
            return format!("/{pattern}");
        }
        if !pattern.starts_with('/') {
            return format!("/**/{pattern}");
        }
        pattern.to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pattern that matches every path (`/**`).
    pub fn match_all() -> Self {
        Self::parse("/**")
    }

    /// True if this pattern is exactly match-all (`/**` or empty), used by
    /// `history` to decide whether revision 1 (the empty initial commit)
    /// is included (spec.md §4.1, §8).
    pub fn is_match_all(&self) -> bool {
        self.raw == "/**"
    }

    pub fn matches(&self, path: &str) -> bool {
        let path_segments = segments(path);
        self.alternatives
            .iter()
            .any(|alt| segments_match(alt, &path_segments))
    }
}

fn segments_match(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(Segment::AnyDepth) => {
            if segments_match(&pattern[1..], path) {
                return true;
            }
            match path.split_first() {
                Some((_, rest)) => segments_match(pattern, rest),
                None => false,
            }
        }
        Some(Segment::Single) => match path.split_first() {
            Some((_, rest)) => segments_match(&pattern[1..], rest),
            None => false,
        },
        Some(Segment::Literal(lit)) => match path.split_first() {
            Some((head, rest)) if head == lit => segments_match(&pattern[1..], rest),
            _ => false,
        },
    }
}

/// All proper ancestor directory paths of `path`, from shallowest to
/// deepest, e.g. `/a/b/c.json` -> `["/", "/a/", "/a/b/"]`.
pub fn ancestor_directories(path: &str) -> Vec<String> {
    let segs = segments(path);
    let mut out = vec!["/".to_string()];
    let mut prefix = String::new();
    for segment in segs.iter().take(segs.len().saturating_sub(1)) {
        prefix.push('/');
        prefix.push_str(segment);
        out.push(format!("{prefix}/"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_path_requires_leading_slash() {
        assert!(validate_path("a.json").is_err());
        assert!(validate_path("/a.json").is_ok());
        assert!(validate_path("/a//b.json").is_err());
        assert!(validate_path("/../a.json").is_err());
    }

    #[test]
    fn star_matches_single_segment_only() {
        let p = PathPattern::parse("/a/*.json");
        assert!(p.matches("/a/b.json"));
        assert!(!p.matches("/a/b/c.json"));
        assert!(!p.matches("/a.json"));
    }

    #[test]
    fn double_star_matches_any_depth() {
        let p = PathPattern::parse("/a/**");
        assert!(p.matches("/a/b.json"));
        assert!(p.matches("/a/b/c/d.json"));
        assert!(p.matches("/a/"));
        assert!(!p.matches("/b.json"));
    }

    #[test]
    fn comma_separated_alternatives() {
        let p = PathPattern::parse("/a.json,/b.json");
        assert!(p.matches("/a.json"));
        assert!(p.matches("/b.json"));
        assert!(!p.matches("/c.json"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let p = PathPattern::parse("");
        assert!(p.is_match_all());
        assert!(p.matches("/anything/at/all.json"));
    }

    #[test]
    fn ancestor_directories_from_shallow_to_deep() {
        assert_eq!(
            ancestor_directories("/a/b/c.json"),
            vec!["/".to_string(), "/a/".to_string(), "/a/b/".to_string()]
        );
        assert_eq!(ancestor_directories("/c.json"), vec!["/".to_string()]);
    }

    #[test]
    fn a_path_always_matches_the_pattern_parsed_from_itself() {
        fn prop(segments: Vec<String>) -> bool {
            let clean: Vec<String> = segments
                .into_iter()
                .map(|s| s.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
                .filter(|s| !s.is_empty())
                .take(6)
                .collect();
            if clean.is_empty() {
                return true;
            }
            let path = format!("/{}", clean.join("/"));
            PathPattern::parse(&path).matches(&path)
        }
        quickcheck::QuickCheck::new()
            .tests(200)
            .quickcheck(prop as fn(Vec<String>) -> bool);
    }

    #[test]
    fn any_depth_suffix_still_matches_the_literal_prefix_path() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..50 {
            let depth = rng.random_range(1..5);
            let mut path = String::from("/base");
            for i in 0..depth {
                path.push_str(&format!("/seg{i}"));
            }
            let pattern = PathPattern::parse("/base/**");
            assert!(pattern.matches(&path));
        }
    }
}
