//! Path utilities
//!
//! Pure string handling for slash-separated paths. Nothing here touches a
//! tree; resolution against nodes lives in `tree.rs`.

/// Collapse `.`, `..` and repeated separators. Relative input is treated as
/// relative to `/`. `..` at the root stays at the root.
pub fn normalize_path(path: &str) -> String {
    let mut resolved: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            _ => resolved.push(part),
        }
    }
    if resolved.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", resolved.join("/"))
    }
}

/// Turn `input` into an absolute, normalized path, joining it onto `cwd`
/// unless it already starts at the root.
pub fn getpath(cwd: &str, input: &str) -> String {
    if input.starts_with('/') {
        normalize_path(input)
    } else if cwd == "/" {
        normalize_path(&format!("/{}", input))
    } else {
        normalize_path(&format!("{}/{}", cwd, input))
    }
}

/// Non-empty components of a normalized absolute path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}

/// Split a normalized absolute path into its parent directory and final
/// component. The root has no final component.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(("/", &path[1..])),
        Some(pos) => Some((&path[..pos], &path[pos + 1..])),
        None => Some(("/", path)),
    }
}

pub fn dirname(path: &str) -> &str {
    split_parent(path).map(|(dir, _)| dir).unwrap_or("/")
}

pub fn basename(path: &str) -> &str {
    split_parent(path).map(|(_, name)| name).unwrap_or("/")
}

/// Join a child name onto a directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/foo/bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo/bar/"), "/foo/bar");
        assert_eq!(normalize_path("foo/bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo/./bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo//bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo/../bar"), "/bar");
        assert_eq!(normalize_path("/foo/bar/.."), "/foo");
        assert_eq!(normalize_path("/../.."), "/");
    }

    #[test]
    fn test_getpath() {
        assert_eq!(getpath("/", "foo"), "/foo");
        assert_eq!(getpath("/home/test", "src"), "/home/test/src");
        assert_eq!(getpath("/home/test", "../other/./x"), "/home/other/x");
        assert_eq!(getpath("/home/test", "/abs//path/"), "/abs/path");
        assert_eq!(getpath("/a", ""), "/a");
        assert_eq!(getpath("/a", "."), "/a");
        assert_eq!(getpath("/a/b", "../../.."), "/");
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/"), None);
        assert_eq!(split_parent("/foo"), Some(("/", "foo")));
        assert_eq!(split_parent("/foo/bar.txt"), Some(("/foo", "bar.txt")));
    }

    #[test]
    fn test_dirname_basename() {
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("/foo"), "/");
        assert_eq!(dirname("/foo/bar/baz"), "/foo/bar");
        assert_eq!(basename("/foo/bar/baz"), "baz");
        assert_eq!(basename("/"), "/");
    }

    #[test]
    fn test_components_and_join() {
        let parts: Vec<&str> = components("/a/b/c").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        assert_eq!(components("/").count(), 0);
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }
}
