//! Basic authentication gate. The credential *check* itself is behind a
//! trait: this module owns realm lookup, header parsing, and the verdict,
//! not the hashing scheme a deployment chooses for its password entries.

use base64::Engine;

use crate::config::Config;
use crate::http::HttpRequest;

pub trait CredentialChecker: Send + Sync {
    /// Returns true if `password` is valid against the stored
    /// `password_entry` string from the config file / CLI.
    fn verify(&self, password: &str, password_entry: &str) -> bool;
}

/// Default checker: plaintext comparison only. Sufficient for tests and
/// trivial deployments; a production deployment is expected to supply its
/// own `CredentialChecker` backed by a real crypt(3)-compatible scheme,
/// since that comparison is explicitly out of this crate's scope.
pub struct DefaultCredentialChecker;

impl CredentialChecker for DefaultCredentialChecker {
    fn verify(&self, password: &str, password_entry: &str) -> bool {
        password == password_entry
    }
}

pub enum AuthOutcome {
    /// No realm matched, or credentials were valid.
    Allowed,
    /// A realm matched but credentials were missing or wrong.
    Challenge { realm: String },
}

pub fn check(config: &Config, request: &HttpRequest, url_path: &str, checker: &dyn CredentialChecker) -> AuthOutcome {
    let Some(entry) = config.realm_for(url_path) else {
        return AuthOutcome::Allowed;
    };

    let Some(header) = request.header("authorization") else {
        return AuthOutcome::Challenge { realm: config.realm.clone() };
    };

    let Some(encoded) = header.strip_prefix("Basic ") else {
        return AuthOutcome::Challenge { realm: config.realm.clone() };
    };

    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return AuthOutcome::Challenge { realm: config.realm.clone() };
    };

    let Ok(text) = String::from_utf8(decoded) else {
        return AuthOutcome::Challenge { realm: config.realm.clone() };
    };

    let Some((user, pass)) = text.split_once(':') else {
        return AuthOutcome::Challenge { realm: config.realm.clone() };
    };

    if user == entry.username && checker.verify(pass, &entry.password_entry) {
        AuthOutcome::Allowed
    } else {
        AuthOutcome::Challenge { realm: config.realm.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthRealm;
    use crate::http::{Method, Version};

    fn req_with_auth(header: Option<&str>) -> HttpRequest {
        let mut headers = Vec::new();
        if let Some(h) = header {
            headers.push(("Authorization".to_string(), h.to_string()));
        }
        HttpRequest {
            method: Method::Get,
            url: "/private/x".to_string(),
            version: Version::Http11,
            headers,
            body_prefix: Vec::new(),
            redirect_status: 0,
        }
    }

    #[test]
    fn no_matching_realm_allows() {
        let cfg = Config::default();
        let req = req_with_auth(None);
        assert!(matches!(check(&cfg, &req, "/private/x", &DefaultCredentialChecker), AuthOutcome::Allowed));
    }

    #[test]
    fn missing_credentials_challenges() {
        let mut cfg = Config::default();
        cfg.auth_realms.push(AuthRealm { url_prefix: "/private".into(), username: "u".into(), password_entry: "p".into() });
        let req = req_with_auth(None);
        assert!(matches!(check(&cfg, &req, "/private/x", &DefaultCredentialChecker), AuthOutcome::Challenge { .. }));
    }

    #[test]
    fn correct_plaintext_credentials_allow() {
        let mut cfg = Config::default();
        cfg.auth_realms.push(AuthRealm { url_prefix: "/private".into(), username: "u".into(), password_entry: "p".into() });
        let encoded = base64::engine::general_purpose::STANDARD.encode("u:p");
        let req = req_with_auth(Some(&format!("Basic {encoded}")));
        assert!(matches!(check(&cfg, &req, "/private/x", &DefaultCredentialChecker), AuthOutcome::Allowed));
    }
}
