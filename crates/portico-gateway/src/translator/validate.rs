//! Checks on emitted routes
//!
//! The proxy rejects a whole route configuration when one route carries a
//! path it cannot parse or a regex it cannot compile, so every route is
//! checked before it is added and dropped on its own when it fails.

use regex::RegexBuilder;
use thiserror::Error;

use crate::proxy::{
    HeaderMatcher, PathSpecifier, QueryParameterMatcher, Route, RouteAction, StringMatcher,
};

/// Compiled regex bytes allowed per unit of `regexMaxProgramSize`
pub const REGEX_BYTES_PER_PROGRAM_UNIT: usize = 1024;

/// Path segments the proxy would normalize away
const FORBIDDEN_SEQUENCES: [&str; 6] = ["//", "/./", "/../", "%2f", "%2F", "#"];
const FORBIDDEN_SUFFIXES: [&str; 2] = ["/..", "/."];

/// Why an emitted route was rejected
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouteValidationError {
    /// A path carries characters or segments the proxy rejects
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The path
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// A regex does not compile within the program size limit
    #[error("invalid regex {pattern:?}: {reason}")]
    InvalidRegex {
        /// The pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

impl From<RouteValidationError> for portico_common::Error {
    fn from(err: RouteValidationError) -> Self {
        portico_common::Error::validation(err.to_string())
    }
}

/// Path characters: RFC 3986 unreserved, sub-delims, `:`, `@`, `/`, `%`
fn valid_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '.' | '_' | '~' | '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ';'
                | '=' | ':' | '@' | '/' | '%'
        )
}

fn check_chars(path: &str) -> Result<(), RouteValidationError> {
    match path.chars().find(|c| !valid_path_char(*c)) {
        Some(c) => Err(RouteValidationError::InvalidPath {
            path: path.to_string(),
            reason: format!("character {c:?} is not allowed"),
        }),
        None => Ok(()),
    }
}

/// Check a path used for matching or as a redirect target
pub fn check_path(path: &str) -> Result<(), RouteValidationError> {
    let invalid = |reason: String| RouteValidationError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if let Some(seq) = FORBIDDEN_SEQUENCES.iter().find(|s| path.contains(*s)) {
        return Err(invalid(format!("must not contain {seq:?}")));
    }
    if let Some(suffix) = FORBIDDEN_SUFFIXES.iter().find(|s| path.ends_with(*s)) {
        return Err(invalid(format!("must not end with {suffix:?}")));
    }
    check_chars(path)
}

/// Check a prefix rewrite; only the characters are restricted
pub fn check_prefix_rewrite(prefix: &str) -> Result<(), RouteValidationError> {
    check_chars(prefix)
}

/// Compile `pattern` under the program size limit
pub fn check_regex(pattern: &str, max_program_size: usize) -> Result<(), RouteValidationError> {
    RegexBuilder::new(pattern)
        .size_limit(max_program_size.saturating_mul(REGEX_BYTES_PER_PROGRAM_UNIT))
        .build()
        .map(|_| ())
        .map_err(|e| RouteValidationError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn check_string_matcher(m: &StringMatcher, max_program_size: usize) -> Result<(), RouteValidationError> {
    match m {
        StringMatcher::SafeRegex(pattern) => check_regex(pattern, max_program_size),
        StringMatcher::Exact(_) | StringMatcher::Present => Ok(()),
    }
}

/// Check every path and regex of an emitted route
pub fn validate_route(route: &Route, max_program_size: usize) -> Result<(), RouteValidationError> {
    match &route.match_.path {
        PathSpecifier::Prefix(p) | PathSpecifier::PathSeparatedPrefix(p) | PathSpecifier::Path(p) => {
            check_path(p)?
        }
        PathSpecifier::SafeRegex(pattern) => check_regex(pattern, max_program_size)?,
    }
    for HeaderMatcher { matcher, .. } in &route.match_.headers {
        check_string_matcher(matcher, max_program_size)?;
    }
    for QueryParameterMatcher { matcher, .. } in &route.match_.query_parameters {
        check_string_matcher(matcher, max_program_size)?;
    }

    match &route.action {
        Some(RouteAction::Redirect(redirect)) => {
            if let Some(path) = &redirect.path_redirect {
                check_path(path)?;
            }
            if let Some(prefix) = &redirect.prefix_rewrite {
                check_prefix_rewrite(prefix)?;
            }
        }
        Some(RouteAction::Route(forward)) => {
            if let Some(path) = &forward.full_path_rewrite {
                check_path(path)?;
            }
            if let Some(prefix) = &forward.prefix_rewrite {
                check_prefix_rewrite(prefix)?;
            }
        }
        Some(RouteAction::DirectResponse(_)) | None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ClusterSpecifier, ForwardAction, RedirectAction, RouteMatch};
    use portico_common::config::Settings;

    fn route(path: PathSpecifier) -> Route {
        Route {
            name: "r".to_string(),
            match_: RouteMatch {
                path,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_paths() {
        for ok in ["/", "/api/v1", "/a:b@c", "/%20", "/a.b/c~d", "/items;id=1", "/a/..b"] {
            assert!(check_path(ok).is_ok(), "{ok} should pass");
        }
        for bad in [
            "/a//b", "/a/./b", "/a/../b", "/a%2fb", "/a%2Fb", "/a#b", "/a/..", "/a/.", "/a b",
            "/a?b", "/é",
        ] {
            assert!(check_path(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_prefix_rewrite_only_checks_characters() {
        assert!(check_prefix_rewrite("/a//b").is_ok());
        assert!(check_prefix_rewrite("/a b").is_err());
    }

    #[test]
    fn test_regex_compile_and_size_limit() {
        assert!(check_regex("/v[0-9]+/.*", 1024).is_ok());
        assert!(matches!(
            check_regex("/v(", 1024),
            Err(RouteValidationError::InvalidRegex { .. })
        ));
        assert!(check_regex(r"\w{100}", 1).is_err());
    }

    /// Story: The regex budget counts KiB, so the default of 1024 admits a
    /// pattern that one unit rejects
    #[test]
    fn story_regex_budget_counts_kibibytes() {
        let default_budget = Settings::default().regex_max_program_size;
        assert_eq!(default_budget * REGEX_BYTES_PER_PROGRAM_UNIT, 1024 * 1024);
        assert!(check_regex(r"\w{5}", default_budget).is_ok());
        assert!(check_regex(r"\w{5}", 1).is_err());
    }

    #[test]
    fn test_validate_route_checks_match_and_action() {
        assert!(validate_route(&route(PathSpecifier::Path("/ok".to_string())), 1024).is_ok());
        assert!(validate_route(&route(PathSpecifier::Prefix("/a//b".to_string())), 1024).is_err());
        assert!(validate_route(&route(PathSpecifier::SafeRegex("(".to_string())), 1024).is_err());

        let mut redirect = route(PathSpecifier::default());
        redirect.action = Some(RouteAction::Redirect(RedirectAction {
            path_redirect: Some("/x/../y".to_string()),
            response_code: 302,
            ..Default::default()
        }));
        assert!(validate_route(&redirect, 1024).is_err());

        let mut forward = route(PathSpecifier::default());
        let mut action = ForwardAction::new(ClusterSpecifier::Cluster("c".to_string()));
        action.prefix_rewrite = Some("/new prefix".to_string());
        forward.action = Some(RouteAction::Route(action));
        assert!(validate_route(&forward, 1024).is_err());
    }
}
