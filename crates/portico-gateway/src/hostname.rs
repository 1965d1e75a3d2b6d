//! Hostname intersection between listeners and routes
//!
//! Pure functions over strings. A route attaches to a listener only when
//! their hostnames intersect; the intersection decides which virtual hosts
//! the route lands in.

/// Wildcard hostname matching every host
pub const WILDCARD_HOST: &str = "*";

/// Whether `host` is covered by the wildcard `pattern` (`*.suffix`)
///
/// The host must end with `.suffix` and have at least one extra label in
/// front of it, so `*.example.com` covers `a.example.com` and
/// `*.a.example.com` but not `example.com`.
pub fn wildcard_covers(pattern: &str, host: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix('*') else {
        return false;
    };
    if !suffix.starts_with('.') {
        return false;
    }
    match host.strip_suffix(suffix) {
        Some(prefix) => !prefix.is_empty() && !prefix.ends_with('.'),
        None => false,
    }
}

/// Intersect a single listener hostname with a single route hostname
///
/// Returns the more specific of the two when they intersect.
pub fn intersect_one<'a>(listener: &'a str, route: &'a str) -> Option<&'a str> {
    if listener == route {
        return Some(route);
    }
    if wildcard_covers(listener, route) {
        return Some(route);
    }
    if wildcard_covers(route, listener) {
        return Some(listener);
    }
    None
}

/// Intersect a listener hostname with a route's hostnames
///
/// - `None` means nothing intersects and the route must not attach.
/// - `Some(vec![])` means the route attaches with no hostname constraint
///   (its virtual host answers for `*`).
/// - Otherwise the intersected hostnames, in route order, deduplicated.
pub fn intersect(listener: Option<&str>, route: &[String]) -> Option<Vec<String>> {
    let listener = match listener {
        None | Some("") | Some(WILDCARD_HOST) => {
            return Some(dedup(route.iter().map(String::as_str)));
        }
        Some(host) => host,
    };

    if route.is_empty() {
        return Some(vec![listener.to_string()]);
    }

    let matched = dedup(route.iter().filter_map(|r| intersect_one(listener, r)));
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

fn dedup<'a>(hosts: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for host in hosts {
        if !out.iter().any(|h| h == host) {
            out.push(host.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_listener_without_hostname_accepts_route_hosts() {
        let route = hosts(&["a.com", "b.com"]);
        assert_eq!(intersect(None, &route), Some(route.clone()));
        assert_eq!(intersect(Some("*"), &route), Some(route));
    }

    #[test]
    fn test_route_without_hostnames_takes_listener_host() {
        assert_eq!(intersect(Some("foo.com"), &[]), Some(hosts(&["foo.com"])));
        assert_eq!(intersect(None, &[]), Some(vec![]));
    }

    #[test]
    fn test_exact_match_and_mismatch() {
        assert_eq!(
            intersect(Some("foo.com"), &hosts(&["foo.com"])),
            Some(hosts(&["foo.com"]))
        );
        assert_eq!(intersect(Some("foo.com"), &hosts(&["baz.com"])), None);
    }

    #[test]
    fn test_listener_wildcard_filters_route_hosts() {
        let route = hosts(&["a.example.com", "example.com", "b.other.com"]);
        assert_eq!(
            intersect(Some("*.example.com"), &route),
            Some(hosts(&["a.example.com"]))
        );
    }

    #[test]
    fn test_route_wildcard_narrows_to_listener() {
        assert_eq!(
            intersect(Some("foo.example.com"), &hosts(&["*.example.com"])),
            Some(hosts(&["foo.example.com"]))
        );
        assert_eq!(intersect(Some("example.com"), &hosts(&["*.example.com"])), None);
    }

    #[test]
    fn test_wildcard_requires_extra_label() {
        assert!(wildcard_covers("*.example.com", "a.example.com"));
        assert!(wildcard_covers("*.example.com", "*.a.example.com"));
        assert!(!wildcard_covers("*.example.com", "example.com"));
        assert!(!wildcard_covers("*.example.com", ".example.com"));
        assert!(!wildcard_covers("*.example.com", "aexample.com"));
        assert!(!wildcard_covers("foo.com", "a.foo.com"));
    }

    #[test]
    fn test_nested_wildcards() {
        assert_eq!(
            intersect_one("*.example.com", "*.a.example.com"),
            Some("*.a.example.com")
        );
        assert_eq!(
            intersect_one("*.a.example.com", "*.example.com"),
            Some("*.a.example.com")
        );
    }

    #[test]
    fn test_duplicates_removed() {
        assert_eq!(
            intersect(Some("*.example.com"), &hosts(&["a.example.com", "a.example.com"])),
            Some(hosts(&["a.example.com"]))
        );
    }

    fn label() -> impl Strategy<Value = String> {
        "[a-c]{1,2}"
    }

    fn hostname() -> impl Strategy<Value = String> {
        prop::collection::vec(label(), 1..4).prop_map(|labels| labels.join("."))
    }

    proptest! {
        /// Narrowing the listener to a wildcard never admits more hosts
        #[test]
        fn prop_wildcard_intersection_is_monotonic(
            route in prop::collection::vec(hostname(), 1..5),
            suffix in hostname(),
        ) {
            let pattern = format!("*.{suffix}");
            let all = intersect(Some(WILDCARD_HOST), &route).unwrap_or_default();
            let narrowed = intersect(Some(&pattern), &route).unwrap_or_default();
            for host in &narrowed {
                prop_assert!(all.contains(host), "{host} not in {all:?}");
            }
        }

        #[test]
        fn prop_intersect_one_is_symmetric(a in hostname(), b in hostname(), wild in any::<bool>()) {
            let a = if wild { format!("*.{a}") } else { a };
            prop_assert_eq!(intersect_one(&a, &b), intersect_one(&b, &a));
        }
    }
}
