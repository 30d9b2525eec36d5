//! Lexical path manipulation
//!
//! Pure string operations over `/`-separated paths. Nothing here
//! touches the inode tree; the façade cleans paths lexically before
//! resolving them, so `..` in a cleaned absolute path never escapes
//! the root.

/// Path separator used by the virtual namespace
pub const SEPARATOR: char = '/';

/// Separator between entries in path lists
pub const LIST_SEPARATOR: char = ':';

/// Whether `path` is absolute (starts with `/`)
pub fn is_abs(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Lexically canonicalize a path.
///
/// Collapses repeated separators, drops `.` segments, and resolves
/// `..` against preceding segments. In a rooted path `..` stops at the
/// root; in a relative path unmatched `..` segments are preserved.
/// The empty path cleans to `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = is_abs(path);
    let mut out: Vec<&str> = Vec::new();

    for seg in path.split(SEPARATOR) {
        match seg {
            "" | "." => {}
            ".." => match out.last() {
                Some(&"..") | None => {
                    if !rooted {
                        out.push("..");
                    }
                }
                Some(_) => {
                    out.pop();
                }
            },
            _ => out.push(seg),
        }
    }

    let joined = out.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join two path elements with a separator and clean the result.
/// Empty elements are ignored; joining two empties yields the empty
/// string.
pub fn join(base: &str, elem: &str) -> String {
    if base.is_empty() {
        if elem.is_empty() {
            return String::new();
        }
        return clean(elem);
    }
    if elem.is_empty() {
        return clean(base);
    }
    clean(&format!("{base}/{elem}"))
}

/// Split a path immediately after its final separator.
///
/// The directory half keeps its trailing separator; a path with no
/// separator splits into `("", path)`.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    }
}

/// Final element of a path. Trailing separators are stripped first;
/// the empty path yields `.` and an all-separator path yields `/`.
pub fn base(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind(SEPARATOR) {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Directory portion of a path, cleaned.
pub fn dir(path: &str) -> String {
    let (d, _) = split(path);
    clean(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(""), ".");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("/a/b/c"), "/a/b/c");
        assert_eq!(clean("//a//b"), "/a/b");
        assert_eq!(clean("/a/./b"), "/a/b");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("/a/b/.."), "/a");
        assert_eq!(clean("a/../.."), "..");
        assert_eq!(clean("../../x"), "../../x");
        assert_eq!(clean("a/b/"), "a/b");
        assert_eq!(clean("./"), ".");
    }

    #[test]
    fn test_root_never_escaped() {
        assert_eq!(clean("/../../.."), "/");
        assert_eq!(clean("/a/../../b"), "/b");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a/b", "../c"), "/a/c");
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("", ""), "");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("/a/b/c.txt"), ("/a/b/", "c.txt"));
        assert_eq!(split("/a"), ("/", "a"));
        assert_eq!(split("a"), ("", "a"));
        assert_eq!(split("/a/b/"), ("/a/b/", ""));
    }

    #[test]
    fn test_base_and_dir() {
        assert_eq!(base("/a/b/c.txt"), "c.txt");
        assert_eq!(base("/a/b/"), "b");
        assert_eq!(base("/"), "/");
        assert_eq!(base(""), ".");
        assert_eq!(dir("/a/b/c"), "/a/b");
        assert_eq!(dir("/a"), "/");
        assert_eq!(dir("a"), ".");
    }
}
