//! Proxy-safe resource names

use std::borrow::Cow;

use tracing::debug;

fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~' | '*')
}

/// Replace every character the proxy rejects in resource names with `_`
///
/// Borrows when the name is already clean.
pub fn sanitize_name(name: &str) -> Cow<'_, str> {
    if name.chars().all(allowed) {
        return Cow::Borrowed(name);
    }
    let cleaned: String = name
        .chars()
        .map(|c| if allowed(c) { c } else { '_' })
        .collect();
    debug!(original = %name, sanitized = %cleaned, "sanitized resource name");
    Cow::Owned(cleaned)
}
