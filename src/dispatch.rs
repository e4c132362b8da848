//! The dispatcher's decision procedure: Expect handling, the RFC1918
//! filter, path resolution, the auth gate, and the CGI/static branch,
//! plus the single error-handler retry for 404s.

use std::net::SocketAddr;

use crate::auth::{self, AuthOutcome, CredentialChecker};
use crate::cgi::{self, CgiChild};
use crate::config::Config;
use crate::connection::ActiveAction;
use crate::error::Error;
use crate::http::request::{split_url, Method};
use crate::http::{HttpRequest, HttpResponse};
use crate::path::{self, PathInfo};
use crate::static_responder;

pub enum Outcome {
    Respond { response: HttpResponse, action: ActiveAction },
    SpawnCgi(CgiChild),
    Continue100,
}

pub fn dispatch(
    config: &Config,
    request: &HttpRequest,
    peer: SocketAddr,
    local: SocketAddr,
    is_tls: bool,
    checker: &dyn CredentialChecker,
) -> Outcome {
    if let Some(expect) = request.header("expect") {
        if !expect.eq_ignore_ascii_case("100-continue") {
            return Outcome::Respond { response: HttpResponse::canned_error(417), action: ActiveAction::None };
        }
    }

    if config.rfc1918_filter && is_rfc1918(peer.ip()) && !is_rfc1918(local.ip()) {
        return Outcome::Respond {
            response: HttpResponse::canned_error(403),
            action: ActiveAction::None,
        };
    }

    if request.expects_continue() {
        return Outcome::Continue100;
    }

    resolve_and_serve(config, request, peer, local, is_tls, checker)
}

fn resolve_and_serve(
    config: &Config,
    request: &HttpRequest,
    peer: SocketAddr,
    local: SocketAddr,
    is_tls: bool,
    checker: &dyn CredentialChecker,
) -> Outcome {
    let (url_path, _query) = split_url(&request.url);

    match path::resolve(config, url_path) {
        Ok(info) => serve_resolved(config, request, url_path, &info, peer, local, is_tls, checker),
        Err(Error::NotFound(_)) => {
            if let Some(handler) = &config.error_handler {
                if handler != url_path {
                    let mut retried = request.clone();
                    retried.url = handler.clone();
                    retried.redirect_status = 404;
                    return match path::resolve(config, handler) {
                        Ok(info) => serve_resolved(config, &retried, handler, &info, peer, local, is_tls, checker),
                        Err(_) => Outcome::Respond { response: HttpResponse::canned_error(404), action: ActiveAction::None },
                    };
                }
            }
            Outcome::Respond { response: HttpResponse::canned_error(404), action: ActiveAction::None }
        }
        Err(e) => {
            let status = e.status_code().unwrap_or(500);
            Outcome::Respond { response: HttpResponse::canned_error(status), action: ActiveAction::None }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn serve_resolved(
    config: &Config,
    request: &HttpRequest,
    url_path: &str,
    info: &PathInfo,
    peer: SocketAddr,
    local: SocketAddr,
    is_tls: bool,
    checker: &dyn CredentialChecker,
) -> Outcome {
    match auth::check(config, request, url_path, checker) {
        AuthOutcome::Challenge { realm } => {
            let mut res = HttpResponse::canned_error(401);
            res.set_header("WWW-Authenticate", format!("Basic realm=\"{realm}\""));
            return Outcome::Respond { response: res, action: ActiveAction::None };
        }
        AuthOutcome::Allowed => {}
    }

    if !matches!(request.method, Method::Get | Method::Head | Method::Post) {
        return Outcome::Respond { response: HttpResponse::canned_error(405), action: ActiveAction::None };
    }

    if info.is_cgi && !info.is_dir {
        return match cgi::spawn(config, request, info, peer, local, is_tls) {
            Ok(child) => Outcome::SpawnCgi(child),
            Err(e) => Outcome::Respond {
                response: HttpResponse::canned_error(502).with_header("X-Upstream-Error", e.to_string()),
                action: ActiveAction::None,
            },
        };
    }

    match static_responder::serve(config, request, url_path, info) {
        Ok(sr) => Outcome::Respond { response: sr.response, action: sr.action },
        Err(_) => Outcome::Respond { response: HttpResponse::canned_error(500), action: ActiveAction::None },
    }
}

fn is_rfc1918(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
        }
        std::net::IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1918_detection() {
        assert!(is_rfc1918("10.0.0.1".parse().unwrap()));
        assert!(is_rfc1918("192.168.1.1".parse().unwrap()));
        assert!(is_rfc1918("172.16.0.1".parse().unwrap()));
        assert!(!is_rfc1918("8.8.8.8".parse().unwrap()));
    }
}
