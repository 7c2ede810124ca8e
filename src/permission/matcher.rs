//! Request path matching against permission paths

use axum::http::Method;
use dashmap::DashMap;
use regex::Regex;
use std::sync::LazyLock;

use super::{PermissionEntry, PermissionMap};

/// Compiled permission paths, shared by every request
static PATTERNS: LazyLock<DashMap<String, Option<Regex>>> = LazyLock::new(DashMap::new);

/// Routes authorized through the permission of their base path
const AUXILIARY_ROUTES: [(&str, Method); 4] = [
    ("export-data", Method::GET),
    ("import-data", Method::POST),
    ("search-columns", Method::GET),
    ("search-fields", Method::GET),
];

fn compile(path: &str) -> Option<Regex> {
    let trimmed = path.trim_start_matches('/');
    match Regex::new(&format!("^/{}", trimmed)) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Permission path {} is not a valid pattern, matching literally: {}", path, e);
            Regex::new(&format!("^/{}", regex::escape(trimmed))).ok()
        }
    }
}

fn pattern(path: &str) -> Option<Regex> {
    if let Some(re) = PATTERNS.get(path) {
        return re.clone();
    }
    let re = compile(path);
    PATTERNS.insert(path.to_string(), re.clone());
    re
}

/// Whether a registered permission path matches the start of `request_path`
pub fn path_matches(registered: &str, request_path: &str) -> bool {
    pattern(registered).is_some_and(|re| re.is_match(request_path))
}

/// Method and path whose permission authorizes the request.
///
/// `…/export-data`, `…/import-data`, `…/search-columns` and `…/search-fields`
/// resolve to the list or create endpoint they belong to.
pub fn permission_target(method: &Method, path: &str) -> (Method, String) {
    let trimmed = path.trim_end_matches('/');
    for (suffix, target) in AUXILIARY_ROUTES {
        if let Some(base) = trimmed.strip_suffix(suffix) {
            if base.ends_with('/') {
                return (target, base.to_string());
            }
        }
    }
    (method.clone(), path.to_string())
}

/// First entry, in registration order, whose path matches `request_path`
pub fn find_match<'a>(map: &'a PermissionMap, request_path: &str) -> Option<&'a PermissionEntry> {
    map.iter().find(|entry| path_matches(&entry.path, request_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match() {
        assert!(path_matches("/api/system/user", "/api/system/user"));
        assert!(path_matches("api/system/user", "/api/system/user/12"));
        assert!(path_matches("/api/system/user/\\d+", "/api/system/user/12"));
        assert!(!path_matches("/api/system/user", "/v1/api/system/user"));
        assert!(!path_matches("/api/system/role", "/api/system/user"));
    }

    #[test]
    fn test_invalid_pattern_matches_literally() {
        assert!(path_matches("/api/odd(", "/api/odd("));
        assert!(!path_matches("/api/odd(", "/api/odd"));
    }

    #[test]
    fn test_auxiliary_routes() {
        assert_eq!(
            permission_target(&Method::GET, "/api/book/export-data"),
            (Method::GET, "/api/book/".to_string())
        );
        assert_eq!(
            permission_target(&Method::POST, "/api/book/import-data/"),
            (Method::POST, "/api/book/".to_string())
        );
        assert_eq!(
            permission_target(&Method::GET, "/api/book/search-columns"),
            (Method::GET, "/api/book/".to_string())
        );
        assert_eq!(
            permission_target(&Method::DELETE, "/api/book/3"),
            (Method::DELETE, "/api/book/3".to_string())
        );
        assert_eq!(
            permission_target(&Method::GET, "/api/my-export-data"),
            (Method::GET, "/api/my-export-data".to_string())
        );
    }

    #[test]
    fn test_first_match_wins() {
        let mut map = PermissionMap::new();
        map.insert("/api/book", 1, None);
        map.insert("/api/book/export", 2, None);
        assert_eq!(find_match(&map, "/api/book/export").map(|e| e.menu_id), Some(1));
        assert!(find_match(&map, "/api/author").is_none());
    }
}
