//! Line-oriented config file grammar, one directive per line:
//!
//! ```text
//! /<url_prefix>:<user>:<password_entry>
//! I:<index_name>
//! E404:<url>
//! *<.ext>:<interpreter_path>
//! ```
//!
//! Any line not matching one of these leaders (including blank lines) is
//! ignored, matching the original daemon's tolerant line splitter.

use std::path::{Path, PathBuf};

use crate::config::types::{AuthRealm, Config, Interpreter};
use crate::error::{Error, Result};

pub fn apply_config_file(config: &mut Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    for line in text.lines() {
        apply_line(config, line);
    }
    Ok(())
}

fn apply_line(config: &mut Config, line: &str) {
    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.splitn(3, ':');
        let (Some(prefix_tail), Some(user), Some(pass)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return;
        };
        config.auth_realms.push(AuthRealm {
            url_prefix: format!("/{prefix_tail}"),
            username: user.to_string(),
            password_entry: pass.to_string(),
        });
    } else if let Some(name) = line.strip_prefix("I:") {
        config.index_file = Some(name.to_string());
    } else if let Some(url) = line.strip_prefix("E404:") {
        config.error_handler = Some(url.to_string());
    } else if let Some(rest) = line.strip_prefix('*') {
        if let Some((ext, bin)) = rest.split_once(':') {
            config.interpreters.push(Interpreter {
                extension: ext.to_string(),
                binary: PathBuf::from(bin),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth_realm_line() {
        let mut cfg = Config::default();
        apply_line(&mut cfg, "/private:admin:sha256:deadbeef");
        assert_eq!(cfg.auth_realms.len(), 1);
        assert_eq!(cfg.auth_realms[0].url_prefix, "/private");
        assert_eq!(cfg.auth_realms[0].username, "admin");
        assert_eq!(cfg.auth_realms[0].password_entry, "sha256:deadbeef");
    }

    #[test]
    fn parses_index_and_error_and_interpreter() {
        let mut cfg = Config::default();
        apply_line(&mut cfg, "I:home.html");
        apply_line(&mut cfg, "E404:/missing.html");
        apply_line(&mut cfg, "*.php:/usr/bin/php-cgi");
        assert_eq!(cfg.index_file.as_deref(), Some("home.html"));
        assert_eq!(cfg.error_handler.as_deref(), Some("/missing.html"));
        assert_eq!(cfg.interpreters[0].extension, ".php");
        assert_eq!(cfg.interpreters[0].binary, PathBuf::from("/usr/bin/php-cgi"));
    }

    #[test]
    fn ignores_unrecognized_lines() {
        let mut cfg = Config::default();
        apply_line(&mut cfg, "# a comment");
        apply_line(&mut cfg, "");
        assert!(cfg.auth_realms.is_empty());
        assert!(cfg.interpreters.is_empty());
    }
}
