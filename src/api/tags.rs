//! Tag inference from request paths.

/// Strips query, fragment and the API prefix, returning the path segments.
fn segments<'a>(path: &'a str, prefix: &str) -> Vec<&'a str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let prefix = prefix.trim_end_matches('/');
    let rest = match path.strip_prefix(prefix) {
        Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };
    rest.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Resource collection a path addresses, e.g. `documents` for
/// `/api/documents/7`.
pub fn resource_name(path: &str, prefix: &str) -> Option<String> {
    segments(path, prefix).first().map(|s| s.to_string())
}

/// Tags a path maps to: `resource`, plus `resource:id` when the path
/// addresses a single record.
pub fn infer_tags(path: &str, prefix: &str) -> Vec<String> {
    match segments(path, prefix).as_slice() {
        [] => Vec::new(),
        [resource] => vec![resource.to_string()],
        [resource, id, ..] => vec![resource.to_string(), format!("{resource}:{id}")],
    }
}

/// Returns true if `path` lives under the API prefix.
pub fn is_api_path(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(['/', '?']),
        None => false,
    }
}
