//! Path and name sanitization.
//!
//! Every user-supplied path is turned into a [`VirtualPath`] confined to a
//! sandbox root before it reaches the object store:
//!
//! - backslashes become forward slashes
//! - empty, `.` and `..` segments are dropped (or rejected, see
//!   [`TraversalPolicy`])
//! - the sandbox root is prepended when the path does not already start
//!   with it
//! - folder paths end with `/`, file paths do not
//!
//! Nothing here touches the object store.

use std::fmt;

use serde::Deserialize;

use crate::{BlobTreeError, Result};

/// Default sandbox root.
pub const DEFAULT_SANDBOX_ROOT: &str = "input/";

/// Maximum length for a file or folder name (in characters).
pub const MAX_NAME_LENGTH: usize = 255;

/// What to do with `.` and `..` segments in user paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalPolicy {
    /// Drop traversal segments and carry on with what is left.
    #[default]
    Discard,
    /// Refuse the whole path with [`BlobTreeError::InvalidPath`].
    Reject,
}

/// A normalized, sandbox-confined path.
///
/// Folder paths end with `/`; file paths never do. Only
/// [`PathSanitizer`] creates these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    pub(crate) fn new_unchecked(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The path as an object key (files) or key prefix (folders).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a folder path.
    pub fn is_folder(&self) -> bool {
        self.0.is_empty() || self.0.ends_with('/')
    }

    /// Whether this is a file path.
    pub fn is_file(&self) -> bool {
        !self.is_folder()
    }

    /// Last segment, without a trailing slash.
    pub fn name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// Prefix of the containing folder, including its trailing slash.
    ///
    /// Returns `""` for a top-level path.
    pub fn parent_prefix(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => &self.0[..idx + 1],
            None => "",
        }
    }

    /// Whether `other` is this folder or lies anywhere beneath it.
    pub fn contains(&self, other: &VirtualPath) -> bool {
        self.is_folder() && other.0.starts_with(&self.0)
    }

    /// Consume the path and return the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Turns raw user input into [`VirtualPath`]s under one sandbox root.
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    root: String,
    root_segments: Vec<String>,
    policy: TraversalPolicy,
}

impl PathSanitizer {
    /// Create a sanitizer for the given sandbox root (e.g. `input/`).
    ///
    /// The root itself is normalized the same way user paths are, so
    /// `"input"`, `"/input/"` and `"input\\"` all mean `input/`.
    pub fn new(root: &str) -> Self {
        let root_segments: Vec<String> = root
            .replace('\\', "/")
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(str::to_string)
            .collect();
        let root = if root_segments.is_empty() {
            String::new()
        } else {
            format!("{}/", root_segments.join("/"))
        };

        Self {
            root,
            root_segments,
            policy: TraversalPolicy::default(),
        }
    }

    /// Set the traversal policy.
    pub fn with_policy(mut self, policy: TraversalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The normalized sandbox root, with its trailing slash.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The traversal policy in effect.
    pub fn policy(&self) -> TraversalPolicy {
        self.policy
    }

    /// The sandbox root as a folder path.
    pub fn root_folder(&self) -> VirtualPath {
        VirtualPath::new_unchecked(self.root.clone())
    }

    /// Normalize a folder path. The result always ends with `/`.
    pub fn folder(&self, raw: &str) -> Result<VirtualPath> {
        let segments = self.segments(raw)?;
        Ok(VirtualPath::new_unchecked(format!(
            "{}/",
            segments.join("/")
        )))
    }

    /// Normalize a file path. The result never ends with `/`.
    ///
    /// Input that reduces to nothing but the root yields the root's name
    /// without a slash; callers detect that with [`is_root`](Self::is_root).
    pub fn file(&self, raw: &str) -> Result<VirtualPath> {
        let segments = self.segments(raw)?;
        Ok(VirtualPath::new_unchecked(segments.join("/")))
    }

    /// Normalize a path whose kind follows the raw input: a trailing `/` or
    /// `\` means folder, anything else means file.
    pub fn path(&self, raw: &str) -> Result<VirtualPath> {
        if raw.ends_with('/') || raw.ends_with('\\') {
            self.folder(raw)
        } else {
            self.file(raw)
        }
    }

    /// Whether a path designates the sandbox root itself.
    pub fn is_root(&self, path: &VirtualPath) -> bool {
        path.as_str().trim_end_matches('/') == self.root.trim_end_matches('/')
    }

    /// Whether an object key lies inside the sandbox.
    pub fn contains_key(&self, key: &str) -> bool {
        key.starts_with(&self.root)
    }

    fn segments(&self, raw: &str) -> Result<Vec<String>> {
        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" => {}
                "." | ".." => {
                    if self.policy == TraversalPolicy::Reject {
                        return Err(BlobTreeError::InvalidPath(format!(
                            "'{raw}' contains traversal segments"
                        )));
                    }
                }
                s => segments.push(s.to_string()),
            }
        }

        let rooted = segments.len() >= self.root_segments.len()
            && segments
                .iter()
                .zip(&self.root_segments)
                .all(|(a, b)| a == b);
        if !rooted {
            let mut with_root = self.root_segments.clone();
            with_root.extend(segments);
            segments = with_root;
        }

        if segments.is_empty() {
            // Empty sandbox root and empty input: nothing to name.
            return Err(BlobTreeError::InvalidPath(format!(
                "'{raw}' does not name anything"
            )));
        }

        Ok(segments)
    }
}

/// Sanitize a user-supplied file or folder name (not a path).
///
/// Keeps letters, digits, `.`, `_`, `-` and spaces, trims surrounding
/// whitespace, and rejects what is left if it is empty, made only of dots,
/// or longer than [`MAX_NAME_LENGTH`].
pub fn sanitize_name(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(BlobTreeError::InvalidPath(format!(
            "name '{raw}' is empty after sanitization"
        )));
    }
    if cleaned.chars().all(|c| c == '.') {
        return Err(BlobTreeError::InvalidPath(format!(
            "name '{raw}' is not a valid name"
        )));
    }
    if cleaned.chars().count() > MAX_NAME_LENGTH {
        return Err(BlobTreeError::InvalidPath(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }

    Ok(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> PathSanitizer {
        PathSanitizer::new("input/")
    }

    #[test]
    fn test_root_normalization() {
        assert_eq!(PathSanitizer::new("input").root(), "input/");
        assert_eq!(PathSanitizer::new("/input//").root(), "input/");
        assert_eq!(PathSanitizer::new("input\\nested").root(), "input/nested/");
        assert_eq!(PathSanitizer::new("").root(), "");
    }

    #[test]
    fn test_folder_and_file_shapes() {
        let s = sanitizer();
        assert_eq!(s.folder("input/reports").unwrap().as_str(), "input/reports/");
        assert_eq!(s.folder("input/reports/").unwrap().as_str(), "input/reports/");
        assert_eq!(s.file("input/reports/q1.csv/").unwrap().as_str(), "input/reports/q1.csv");
        assert_eq!(s.file("input/a.csv").unwrap().as_str(), "input/a.csv");
    }

    #[test]
    fn test_prepends_root_when_missing() {
        let s = sanitizer();
        assert_eq!(s.folder("reports/q1").unwrap().as_str(), "input/reports/q1/");
        assert_eq!(s.file("data.csv").unwrap().as_str(), "input/data.csv");
        // A segment that merely starts with the root name is not the root.
        assert_eq!(s.file("inputs/a.csv").unwrap().as_str(), "input/inputs/a.csv");
    }

    #[test]
    fn test_collapses_slashes_and_backslashes() {
        let s = sanitizer();
        assert_eq!(s.file("input//a///b\\c.txt").unwrap().as_str(), "input/a/b/c.txt");
        assert_eq!(s.folder("\\\\input\\x\\").unwrap().as_str(), "input/x/");
    }

    #[test]
    fn test_traversal_is_discarded_by_default() {
        let s = sanitizer();
        let hostile = [
            "../../etc/passwd",
            "input/../../secret",
            "..\\..\\windows\\system32",
            "./././a",
            "input/./../output/x.csv",
            "/..",
            "..",
            "....//..//x",
            "a/b/../../../../c",
        ];
        for raw in hostile {
            let path = s.file(raw).unwrap();
            assert!(path.as_str().starts_with("input"), "{raw} -> {path}");
            assert!(
                !path.as_str().split('/').any(|seg| seg == ".." || seg == "."),
                "{raw} -> {path}"
            );
            assert!(!path.as_str().contains('\\'));
            assert!(!path.as_str().contains("//"));

            let folder = s.folder(raw).unwrap();
            assert!(folder.as_str().starts_with("input/"), "{raw} -> {folder}");
            assert!(folder.is_folder());
        }
        assert_eq!(s.file("../../etc/passwd").unwrap().as_str(), "input/etc/passwd");
        assert_eq!(s.file("input/../../secret").unwrap().as_str(), "input/secret");
    }

    #[test]
    fn test_traversal_rejected_under_reject_policy() {
        let s = sanitizer().with_policy(TraversalPolicy::Reject);
        assert!(matches!(
            s.file("../../etc/passwd"),
            Err(BlobTreeError::InvalidPath(_))
        ));
        assert!(matches!(
            s.folder("input\\..\\x"),
            Err(BlobTreeError::InvalidPath(_))
        ));
        assert!(matches!(s.file("./a"), Err(BlobTreeError::InvalidPath(_))));
        // Clean input is unaffected.
        assert_eq!(s.file("input/a/b.csv").unwrap().as_str(), "input/a/b.csv");
    }

    #[test]
    fn test_empty_input_resolves_to_root() {
        let s = sanitizer();
        let folder = s.folder("").unwrap();
        assert_eq!(folder.as_str(), "input/");
        assert!(s.is_root(&folder));

        let file = s.file("..").unwrap();
        assert_eq!(file.as_str(), "input");
        assert!(s.is_root(&file));
    }

    #[test]
    fn test_empty_root_and_empty_input_is_rejected() {
        let s = PathSanitizer::new("");
        assert!(matches!(s.folder("/"), Err(BlobTreeError::InvalidPath(_))));
        assert_eq!(s.file("a.csv").unwrap().as_str(), "a.csv");
    }

    #[test]
    fn test_path_kind_follows_input() {
        let s = sanitizer();
        assert!(s.path("input/a/").unwrap().is_folder());
        assert!(s.path("input\\a\\").unwrap().is_folder());
        assert!(s.path("input/a").unwrap().is_file());
    }

    #[test]
    fn test_multiple_roots_are_independent() {
        let input = PathSanitizer::new("input/");
        let output = PathSanitizer::new("output/");
        assert_eq!(input.file("x.csv").unwrap().as_str(), "input/x.csv");
        assert_eq!(output.file("x.csv").unwrap().as_str(), "output/x.csv");
        assert_eq!(output.file("input/x.csv").unwrap().as_str(), "output/input/x.csv");
    }

    #[test]
    fn test_virtual_path_accessors() {
        let s = sanitizer();
        let file = s.file("input/reports/q1/data.csv").unwrap();
        assert_eq!(file.name(), "data.csv");
        assert_eq!(file.parent_prefix(), "input/reports/q1/");

        let folder = s.folder("input/reports/q1").unwrap();
        assert_eq!(folder.name(), "q1");
        assert_eq!(folder.parent_prefix(), "input/reports/");

        let root = s.root_folder();
        assert_eq!(root.name(), "input");
        assert_eq!(root.parent_prefix(), "");
    }

    #[test]
    fn test_contains() {
        let s = sanitizer();
        let reports = s.folder("input/reports").unwrap();
        assert!(reports.contains(&s.folder("input/reports").unwrap()));
        assert!(reports.contains(&s.folder("input/reports/q1").unwrap()));
        assert!(reports.contains(&s.file("input/reports/a.csv").unwrap()));
        assert!(!reports.contains(&s.folder("input/reports2").unwrap()));
        assert!(!s.file("input/a.csv").unwrap().contains(&s.file("input/a.csv").unwrap()));
    }

    #[test]
    fn test_contains_key() {
        let s = sanitizer();
        assert!(s.contains_key("input/a.csv"));
        assert!(!s.contains_key("output/a.csv"));
        assert!(!s.contains_key("inputs/a.csv"));
    }

    #[test]
    fn test_sanitize_name_strips_disallowed_characters() {
        assert_eq!(sanitize_name("report 2024.csv").unwrap(), "report 2024.csv");
        assert_eq!(sanitize_name("a/b\\c:d*e?.txt").unwrap(), "abcde.txt");
        assert_eq!(sanitize_name("  spaced  ").unwrap(), "spaced");
        assert_eq!(sanitize_name("my_file-v2.tar.gz").unwrap(), "my_file-v2.tar.gz");
        assert_eq!(sanitize_name("データ.csv").unwrap(), "データ.csv");
    }

    #[test]
    fn test_sanitize_name_rejects_empty_result() {
        assert!(matches!(sanitize_name(""), Err(BlobTreeError::InvalidPath(_))));
        assert!(matches!(sanitize_name("///"), Err(BlobTreeError::InvalidPath(_))));
        assert!(matches!(sanitize_name("   "), Err(BlobTreeError::InvalidPath(_))));
        assert!(matches!(sanitize_name(".."), Err(BlobTreeError::InvalidPath(_))));
        assert!(matches!(sanitize_name("../"), Err(BlobTreeError::InvalidPath(_))));
    }

    #[test]
    fn test_sanitize_name_length_limit() {
        let long = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(matches!(sanitize_name(&long), Err(BlobTreeError::InvalidPath(_))));
        let ok = "a".repeat(MAX_NAME_LENGTH);
        assert_eq!(sanitize_name(&ok).unwrap(), ok);
    }
}
