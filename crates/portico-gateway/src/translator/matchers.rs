//! `HTTPRouteMatch` lowering

use crate::gateway_api::{HttpHeaderMatch, HttpQueryParamMatch, HttpRouteMatch, StringMatchType};
use crate::ir::{path_of, PathKind};
use crate::proxy::{HeaderMatcher, PathSpecifier, QueryParameterMatcher, RouteMatch, StringMatcher};

/// Pseudo-header carrying the request method
pub const METHOD_HEADER: &str = ":method";

/// Lower one match to the proxy's route match
pub fn route_match(m: &HttpRouteMatch) -> RouteMatch {
    let (kind, value) = path_of(m);
    let path = match kind {
        PathKind::Exact => PathSpecifier::Path(value),
        PathKind::PathSeparatedPrefix => PathSpecifier::PathSeparatedPrefix(value),
        PathKind::Prefix => PathSpecifier::Prefix(value),
        PathKind::Regex => PathSpecifier::SafeRegex(value),
    };

    let mut headers: Vec<HeaderMatcher> = m.headers.iter().map(header_matcher).collect();
    if let Some(method) = &m.method {
        headers.push(HeaderMatcher {
            name: METHOD_HEADER.to_string(),
            matcher: StringMatcher::Exact(method.clone()),
        });
    }

    RouteMatch {
        path,
        headers,
        query_parameters: m.query_params.iter().map(query_matcher).collect(),
    }
}

fn string_matcher(type_: Option<StringMatchType>, value: &str) -> StringMatcher {
    if value.is_empty() {
        return StringMatcher::Present;
    }
    match type_.unwrap_or_default() {
        StringMatchType::Exact => StringMatcher::Exact(value.to_string()),
        StringMatchType::RegularExpression => StringMatcher::SafeRegex(value.to_string()),
    }
}

fn header_matcher(h: &HttpHeaderMatch) -> HeaderMatcher {
    HeaderMatcher {
        name: h.name.clone(),
        matcher: string_matcher(h.type_, &h.value),
    }
}

fn query_matcher(q: &HttpQueryParamMatch) -> QueryParameterMatcher {
    QueryParameterMatcher {
        name: q.name.clone(),
        matcher: string_matcher(q.type_, &q.value),
    }
}
