//! Key normalization.
//!
//! Keys are `/`-separated paths into a tree. The canonical form has no
//! leading or trailing slash, no empty or `.` segments, and `..` resolved;
//! the root is spelled `/`. Every public entry point passes keys through
//! [`canonical`] before touching a tree, so `"foo/bar"`, `"./foo/bar/"` and
//! `"//foo///bar"` all address the same entry.

/// Canonicalize a key.
///
/// Empty strings, `"."` and `"/"` all canonicalize to `"/"`. `..` segments
/// pop the previous segment; keys are rooted, so segments that would escape
/// the root are dropped.
pub fn canonical(key: &str) -> String {
    let mut segs: Vec<&str> = Vec::new();
    for seg in key.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    if segs.is_empty() {
        "/".to_string()
    } else {
        segs.join("/")
    }
}

/// Split a canonical key into `(base, leaf)` where `leaf` is the final
/// segment and `base` is everything before it (`"/"` if the key has a
/// single segment). The root splits into `("/", "")`.
pub fn split(key: &str) -> (String, String) {
    let key = canonical(key);
    if key == "/" {
        return ("/".to_string(), String::new());
    }
    match key.rfind('/') {
        Some(i) => (key[..i].to_string(), key[i + 1..].to_string()),
        None => ("/".to_string(), key),
    }
}

/// Split a canonical key into `(head, rest)` where `head` is the first
/// segment and `rest` the remainder (`"/"` if nothing remains).
pub fn first(key: &str) -> (String, String) {
    let key = canonical(key);
    if key == "/" {
        return (String::new(), "/".to_string());
    }
    match key.find('/') {
        Some(i) => (key[..i].to_string(), key[i + 1..].to_string()),
        None => (key, "/".to_string()),
    }
}

/// The ordered segments of a key; empty for the root.
pub fn parts(key: &str) -> Vec<String> {
    let key = canonical(key);
    if key == "/" {
        return Vec::new();
    }
    key.split('/').map(str::to_string).collect()
}

/// Join two keys and canonicalize the result.
pub fn join(base: &str, key: &str) -> String {
    canonical(&format!("{}/{}", base, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_root_forms() {
        for k in ["", ".", "/", "//", "/./", "./."] {
            assert_eq!(canonical(k), "/", "canonical({:?})", k);
        }
    }

    #[test]
    fn test_canonical_variants() {
        for k in [
            "foo/bar",
            "./foo/bar",
            "./foo/bar/",
            "foo///bar////",
            "/foo/bar",
            "////foo////bar/",
        ] {
            assert_eq!(canonical(k), "foo/bar", "canonical({:?})", k);
        }
    }

    #[test]
    fn test_canonical_dotdot() {
        assert_eq!(canonical("a/b/../c"), "a/c");
        assert_eq!(canonical("../a"), "a");
        assert_eq!(canonical("a/.."), "/");
    }

    #[test]
    fn test_canonical_idempotent() {
        for k in ["", "/", "a", "/a/b/", "a//b/./c", "x/../y"] {
            let once = canonical(k);
            assert_eq!(canonical(&once), once);
        }
    }

    #[test]
    fn test_split() {
        assert_eq!(split("a/b/c"), ("a/b".to_string(), "c".to_string()));
        assert_eq!(split("foo"), ("/".to_string(), "foo".to_string()));
        assert_eq!(split("/"), ("/".to_string(), String::new()));
        assert_eq!(split("/foo/bar/"), ("foo".to_string(), "bar".to_string()));
    }

    #[test]
    fn test_first() {
        assert_eq!(first("a/b/c"), ("a".to_string(), "b/c".to_string()));
        assert_eq!(first("foo"), ("foo".to_string(), "/".to_string()));
        assert_eq!(first("/"), (String::new(), "/".to_string()));
    }

    #[test]
    fn test_parts() {
        assert!(parts("/").is_empty());
        assert_eq!(parts("a/b"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_join() {
        assert_eq!(join("a", "b"), "a/b");
        assert_eq!(join("/", "b"), "b");
        assert_eq!(join("a/b/", "/c"), "a/b/c");
        assert_eq!(join("/", "/"), "/");
    }
}
