//! Node path helpers
//!
//! Paths are absolute, `/`-separated, without trailing slash (except the root)
//! and without empty, `.` or `..` segments.

use crate::error::{StoreError, StoreResult};

pub const ROOT: &str = "/";

/// Validate an absolute node path
pub fn validate(path: &str) -> StoreResult<()> {
    if !path.starts_with('/') {
        return Err(StoreError::invalid_path(path, "must start with '/'"));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(StoreError::invalid_path(path, "must not end with '/'"));
    }
    for segment in path[1..].split('/') {
        validate_name(segment).map_err(|_| {
            StoreError::invalid_path(path, format!("bad segment '{}'", segment))
        })?;
    }
    Ok(())
}

/// Validate a single child name
pub fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::invalid_path(name, "empty name"));
    }
    if name == "." || name == ".." {
        return Err(StoreError::invalid_path(name, "relative segment"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(StoreError::invalid_path(name, "illegal character"));
    }
    Ok(())
}

/// Join a parent path and a child name
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of a path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Every ancestor of `path` from the top down, excluding the root and `path` itself
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut result = Vec::new();
    if path == ROOT {
        return result;
    }
    for (idx, ch) in path.char_indices().skip(1) {
        if ch == '/' {
            result.push(&path[..idx]);
        }
    }
    result
}

/// Parsed connect string `host:port[,host:port...][/chroot]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    pub hosts: Vec<String>,
    pub chroot: Option<String>,
}

impl ConnectString {
    pub fn parse(s: &str) -> StoreResult<Self> {
        let (hosts, chroot) = match s.find('/') {
            Some(idx) => (&s[..idx], Some(&s[idx..])),
            None => (s, None),
        };

        let chroot = match chroot {
            None | Some("/") => None,
            Some(c) => {
                validate(c)?;
                Some(c.to_string())
            }
        };

        let hosts = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { hosts, chroot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(validate("/").is_ok());
        assert!(validate("/configs/myconf/schema.xml").is_ok());
        assert!(validate("configs").is_err());
        assert!(validate("/configs/").is_err());
        assert!(validate("/configs//x").is_err());
        assert!(validate("/configs/../x").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b/c"), "c");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").is_empty());
    }

    #[test]
    fn test_connect_string() {
        let cs = ConnectString::parse("localhost:9983,other:2181/solr").unwrap();
        assert_eq!(cs.hosts, vec!["localhost:9983", "other:2181"]);
        assert_eq!(cs.chroot.as_deref(), Some("/solr"));

        let cs = ConnectString::parse("localhost:9983").unwrap();
        assert_eq!(cs.chroot, None);

        assert!(ConnectString::parse("localhost:9983/solr/").is_err());
    }
}
