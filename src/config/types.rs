use std::net::IpAddr;
use std::path::PathBuf;

/// One `-p`/`-s` bind entry.
#[derive(Debug, Clone)]
pub struct BindSpec {
    pub addr: IpAddr,
    pub port: u16,
    pub tls: bool,
}

/// An `*<.ext>:<interpreter>` binding.
#[derive(Debug, Clone)]
pub struct Interpreter {
    pub extension: String,
    pub binary: PathBuf,
}

/// A `/<prefix>:<user>:<password_entry>` auth realm entry.
#[derive(Debug, Clone)]
pub struct AuthRealm {
    pub url_prefix: String,
    pub username: String,
    pub password_entry: String,
}

/// The fully resolved, immutable configuration the server runs with.
/// Built by layering the config file (if any) under CLI flags, which win
/// on conflict.
#[derive(Debug, Clone)]
pub struct Config {
    pub document_root: PathBuf,
    pub index_file: Option<String>,
    pub error_handler: Option<String>,
    pub realm: String,
    pub follow_symlinks: bool,
    pub allow_dirlist: bool,
    pub rfc1918_filter: bool,
    pub max_requests: usize,
    pub network_timeout_s: u64,
    pub script_timeout_s: u64,
    pub tcp_keepalive_s: Option<u64>,
    pub cgi_prefix: String,
    pub interpreters: Vec<Interpreter>,
    pub auth_realms: Vec<AuthRealm>,
    pub binds: Vec<BindSpec>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("."),
            index_file: Some("index.html".to_string()),
            error_handler: None,
            realm: "Protected Area".to_string(),
            follow_symlinks: true,
            allow_dirlist: true,
            rfc1918_filter: false,
            max_requests: 3,
            network_timeout_s: 30,
            script_timeout_s: 60,
            tcp_keepalive_s: None,
            cgi_prefix: "/cgi-bin".to_string(),
            interpreters: Vec::new(),
            auth_realms: Vec::new(),
            binds: Vec::new(),
            cert_file: None,
            key_file: None,
        }
    }
}

impl Config {
    /// Picks the longest-matching `auth_realms` entry for a URL, per the
    /// glossary's prefix-match rule.
    pub fn realm_for(&self, url_path: &str) -> Option<&AuthRealm> {
        self.auth_realms
            .iter()
            .filter(|r| path_prefix_matches(&r.url_prefix, url_path))
            .max_by_key(|r| r.url_prefix.len())
    }

    pub fn interpreter_for(&self, extension: &str) -> Option<&Interpreter> {
        self.interpreters.iter().find(|i| i.extension == extension)
    }

    pub fn is_cgi_path(&self, url_path: &str) -> bool {
        path_prefix_matches(&self.cgi_prefix, url_path)
    }
}

/// Exact match, or `prefix` ends in `/`, or the character in `path`
/// immediately following `prefix` is `/`.
pub fn path_prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    if prefix == path || prefix.ends_with('/') {
        return true;
    }
    path.as_bytes().get(prefix.len()) == Some(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_rules() {
        assert!(path_prefix_matches("/private", "/private"));
        assert!(path_prefix_matches("/private", "/private/a"));
        assert!(!path_prefix_matches("/private", "/privateer"));
        assert!(path_prefix_matches("/cgi-bin/", "/cgi-bin/x"));
    }

    #[test]
    fn realm_picks_longest_prefix() {
        let mut cfg = Config::default();
        cfg.auth_realms.push(AuthRealm { url_prefix: "/".to_string(), username: "a".into(), password_entry: "".into() });
        cfg.auth_realms.push(AuthRealm { url_prefix: "/admin".to_string(), username: "b".into(), password_entry: "".into() });
        let r = cfg.realm_for("/admin/panel").unwrap();
        assert_eq!(r.username, "b");
    }
}
