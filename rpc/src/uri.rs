//! Conversion between filesystem paths and `file://` URIs, plus workspace
//! containment.
//!
//! The encode set is pinned here rather than delegated to a URL library:
//! the unreserved set is `[A-Za-z0-9]` plus `-._~/:`, hex escapes are
//! uppercase, and decoding rejects ill-formed percent triplets instead of
//! passing them through. `uri_to_path(path_to_uri(p)) == p` holds for any
//! byte sequence a path can carry.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_encode};

const FILE_SCHEME: &str = "file://";

/// Everything outside `[A-Za-z0-9]` and `-._~/:` gets percent-encoded.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b':');

#[derive(Debug, thiserror::Error)]
pub enum UriError {
    #[error("not a file:// URI: {0:?}")]
    NotFileScheme(String),

    #[error("ill-formed percent escape in URI: {0:?}")]
    BadEscape(String),

    #[cfg(not(unix))]
    #[error("URI does not decode to valid UTF-8: {0:?}")]
    NotUtf8(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("path escapes the workspace root: {}", .0.display())]
    OutsideWorkspace(PathBuf),

    #[error("cannot resolve {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Render a path as a `file://` URI.
#[must_use]
pub fn path_to_uri(path: &Path) -> String {
    let bytes = path_bytes(path);
    format!("{FILE_SCHEME}{}", percent_encode(bytes, PATH_ENCODE_SET))
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

/// Parse a `file://` URI back into a path.
///
/// Rejects any other scheme and any `%` not followed by two hex digits.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, UriError> {
    let Some(encoded) = uri.strip_prefix(FILE_SCHEME) else {
        return Err(UriError::NotFileScheme(uri.to_string()));
    };

    let raw = encoded.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hi = raw.get(i + 1).copied().and_then(hex_value);
            let lo = raw.get(i + 2).copied().and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => {
                    bytes.push((hi << 4) | lo);
                    i += 3;
                }
                _ => return Err(UriError::BadEscape(uri.to_string())),
            }
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }

    bytes_to_path(bytes, uri)
}

#[cfg(unix)]
fn bytes_to_path(bytes: Vec<u8>, _uri: &str) -> Result<PathBuf, UriError> {
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: Vec<u8>, uri: &str) -> Result<PathBuf, UriError> {
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| UriError::NotUtf8(uri.to_string()))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// The immutable workspace anchor: a canonical absolute root and its URI,
/// built once at startup. All file access on behalf of tools resolves
/// through [`Workspace::resolve`].
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    root_uri: String,
}

impl Workspace {
    pub fn new(root: &Path) -> Result<Self, PathError> {
        let root = canonicalize(root)?;
        let root_uri = path_to_uri(&root);
        Ok(Self { root, root_uri })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    /// Resolve `candidate` (absolute, or relative to the root) to a
    /// canonical path and require it to stay inside the root.
    ///
    /// Canonicalization resolves symlinks and `..` before the containment
    /// check, so neither can smuggle a path out.
    pub fn resolve(&self, candidate: &Path) -> Result<PathBuf, PathError> {
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let canonical = canonicalize(&joined)?;
        if canonical == self.root || canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(PathError::OutsideWorkspace(candidate.to_path_buf()))
        }
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, PathError> {
    std::fs::canonicalize(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            PathError::NotFound(path.to_path_buf())
        } else {
            PathError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_is_left_alone() {
        assert_eq!(
            path_to_uri(Path::new("/home/dev/src/main.rs")),
            "file:///home/dev/src/main.rs"
        );
    }

    #[test]
    fn spaces_are_encoded_uppercase() {
        assert_eq!(
            path_to_uri(Path::new("/a dir/file.rs")),
            "file:///a%20dir/file.rs"
        );
    }

    #[test]
    fn unreserved_punctuation_survives() {
        assert_eq!(
            path_to_uri(Path::new("/a-b/c.d_e~f:g")),
            "file:///a-b/c.d_e~f:g"
        );
    }

    #[test]
    fn uri_to_path_decodes_escapes() {
        assert_eq!(
            uri_to_path("file:///a%20dir/file.rs").unwrap(),
            PathBuf::from("/a dir/file.rs")
        );
    }

    #[test]
    fn non_file_scheme_is_rejected() {
        assert!(matches!(
            uri_to_path("https://example.com/x"),
            Err(UriError::NotFileScheme(_))
        ));
        assert!(matches!(
            uri_to_path("/no/scheme"),
            Err(UriError::NotFileScheme(_))
        ));
    }

    #[test]
    fn ill_formed_escape_is_rejected() {
        assert!(matches!(
            uri_to_path("file:///a%2"),
            Err(UriError::BadEscape(_))
        ));
        assert!(matches!(
            uri_to_path("file:///a%zz"),
            Err(UriError::BadEscape(_))
        ));
        assert!(matches!(
            uri_to_path("file:///a%"),
            Err(UriError::BadEscape(_))
        ));
    }

    #[test]
    fn roundtrip_with_awkward_bytes() {
        for path in [
            "/plain/path.rs",
            "/with space/and%percent",
            "/emoji/🦀.rs",
            "/quo\"te/new\nline",
        ] {
            let p = PathBuf::from(path);
            assert_eq!(uri_to_path(&path_to_uri(&p)).unwrap(), p, "path {path:?}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn roundtrip_with_non_utf8_bytes() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let p = PathBuf::from(OsString::from_vec(b"/weird/\xff\xfe".to_vec()));
        assert_eq!(uri_to_path(&path_to_uri(&p)).unwrap(), p);
    }

    #[test]
    fn workspace_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();

        let ws = Workspace::new(dir.path()).unwrap();
        let resolved = ws.resolve(Path::new("a.rs")).unwrap();
        assert!(resolved.starts_with(ws.root()));
        assert!(resolved.ends_with("a.rs"));
    }

    #[test]
    fn workspace_accepts_its_own_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        assert_eq!(ws.resolve(Path::new(".")).unwrap(), ws.root());
    }

    #[test]
    fn workspace_rejects_dotdot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let err = ws.resolve(Path::new("../outside.rs")).unwrap_err();
        assert!(matches!(
            err,
            PathError::OutsideWorkspace(_) | PathError::NotFound(_)
        ));
    }

    #[test]
    fn workspace_rejects_absolute_path_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("x.rs"), "x").unwrap();

        let ws = Workspace::new(dir.path()).unwrap();
        let err = ws.resolve(&other.path().join("x.rs")).unwrap_err();
        assert!(matches!(err, PathError::OutsideWorkspace(_)));
    }

    #[cfg(unix)]
    #[test]
    fn workspace_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(other.path().join("secret"), dir.path().join("link")).unwrap();

        let ws = Workspace::new(dir.path()).unwrap();
        let err = ws.resolve(Path::new("link")).unwrap_err();
        assert!(matches!(err, PathError::OutsideWorkspace(_)));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        assert!(matches!(
            ws.resolve(Path::new("no-such.rs")),
            Err(PathError::NotFound(_))
        ));
    }

    #[test]
    fn workspace_root_uri_is_file_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        assert!(ws.root_uri().starts_with("file:///"));
        assert_eq!(uri_to_path(ws.root_uri()).unwrap(), ws.root());
    }
}
