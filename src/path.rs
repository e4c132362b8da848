//! Maps a request URL onto a physical filesystem entity under the
//! document root, applying the symlink-escape and index-resolution
//! policies.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PathInfo {
    pub phys: PathBuf,
    pub is_dir: bool,
    pub is_cgi: bool,
    pub mime: String,
}

/// Normalizes a URL path: percent-decodes, collapses repeated slashes,
/// and resolves `.`/`..` components textually (no filesystem access yet).
pub fn normalize_url_path(url_path: &str) -> Result<String> {
    let decoded = percent_decode_str(url_path)
        .decode_utf8()
        .map_err(|e| Error::ClientProtocol(format!("invalid percent-encoding: {e}")))?;

    let mut components: Vec<&str> = Vec::new();
    for part in decoded.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    Ok(format!("/{}", components.join("/")))
}

/// Resolves a normalized URL path under `document_root`. Returns the
/// canonicalized physical path plus whether it is a directory and whether
/// it should be treated as CGI. Directories without an index file are
/// returned as-is (`is_dir = true`); the caller decides between listing
/// and 403 based on `allow_dirlist`.
pub fn resolve(config: &Config, url_path: &str) -> Result<PathInfo> {
    let normalized = normalize_url_path(url_path)?;
    let root = config
        .document_root
        .canonicalize()
        .map_err(|e| Error::Config(format!("document_root: {e}")))?;

    let joined = join_under_root(&root, &normalized);

    let canon = joined.canonicalize().map_err(|_| Error::NotFound(normalized.clone()))?;

    if !config.follow_symlinks && !canon.starts_with(&root) {
        return Err(Error::ClientPolicy(format!("{normalized} escapes document root")));
    }

    let meta = std::fs::metadata(&canon).map_err(|_| Error::NotFound(normalized.clone()))?;
    let mut phys = canon;
    let mut is_dir = meta.is_dir();

    if is_dir {
        if let Some(index) = &config.index_file {
            let candidate = phys.join(index);
            if candidate.is_file() {
                phys = candidate;
                is_dir = false;
            }
        }
    }

    let extension = phys.extension().and_then(|e| e.to_str()).map(|e| format!(".{e}"));
    let is_cgi = config.is_cgi_path(&normalized)
        || extension.as_deref().map(|e| config.interpreter_for(e).is_some()).unwrap_or(false);

    let mime = if is_dir {
        "text/html; charset=utf-8".to_string()
    } else {
        mime_guess::from_path(&phys).first_or_octet_stream().to_string()
    };

    Ok(PathInfo { phys, is_dir, is_cgi, mime })
}

fn join_under_root(root: &Path, url_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for component in url_path.split('/').filter(|c| !c.is_empty()) {
        out.push(component);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_dot() {
        assert_eq!(normalize_url_path("/a/../b").unwrap(), "/b");
        assert_eq!(normalize_url_path("/a//b").unwrap(), "/a/b");
        assert_eq!(normalize_url_path("/../../etc/passwd").unwrap(), "/etc/passwd");
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(normalize_url_path("/a%20b").unwrap(), "/a b");
    }

    #[test]
    fn resolves_file_under_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hi").unwrap();
        let mut cfg = Config::default();
        cfg.document_root = dir.path().to_path_buf();
        let info = resolve(&cfg, "/").unwrap();
        assert!(!info.is_dir);
        assert!(info.phys.ends_with("index.html"));
    }
}
