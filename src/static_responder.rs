//! Serves a resolved `PathInfo` as a regular file, a directory listing,
//! or a 304, handling `HEAD`, `If-Modified-Since`, and a single `Range`.

use std::fs::File;
use std::io::Seek;

use httpdate::fmt_http_date;

use crate::config::Config;
use crate::connection::ActiveAction;
use crate::http::request::Method;
use crate::http::response::generate_autoindex;
use crate::http::{HttpRequest, HttpResponse};
use crate::path::PathInfo;

pub struct StaticResponse {
    pub response: HttpResponse,
    pub action: ActiveAction,
}

pub fn serve(config: &Config, request: &HttpRequest, url_path: &str, info: &PathInfo) -> std::io::Result<StaticResponse> {
    if info.is_dir {
        if !config.allow_dirlist {
            let res = HttpResponse::canned_error(403);
            return Ok(StaticResponse { response: res, action: ActiveAction::None });
        }
        let is_root = info.phys == config.document_root.canonicalize().unwrap_or_else(|_| info.phys.clone());
        let res = generate_autoindex(&info.phys, url_path, is_root);
        return Ok(StaticResponse { response: res, action: ActiveAction::None });
    }

    let meta = std::fs::metadata(&info.phys)?;
    let mtime = meta.modified().unwrap_or(std::time::SystemTime::now());

    if let Some(since) = request.header("if-modified-since") {
        if let Ok(since_time) = httpdate::parse_http_date(since) {
            if mtime <= since_time {
                let mut res = HttpResponse::new(304);
                res.set_header("Last-Modified", fmt_http_date(mtime));
                return Ok(StaticResponse { response: res, action: ActiveAction::None });
            }
        }
    }

    let total_len = meta.len();
    let mut file = File::open(&info.phys)?;

    let mut res = HttpResponse::new(200);
    res.set_header("Content-Type", &info.mime);
    res.set_header("Last-Modified", fmt_http_date(mtime));
    res.set_header("Accept-Ranges", "bytes");

    let mut start = 0u64;
    let mut len = total_len;

    if let Some(range) = request.header("range") {
        if let Some((s, e)) = parse_single_range(range, total_len) {
            start = s;
            len = e - s + 1;
            res.status = 206;
            res.set_header("Content-Range", format!("bytes {s}-{e}/{total_len}"));
            file.seek(std::io::SeekFrom::Start(start))?;
        }
    }

    res.set_header("Content-Length", len.to_string());

    let action = if request.method == Method::Head {
        ActiveAction::None
    } else {
        ActiveAction::StaticFile { file, remaining: len }
    };
    let _ = start;

    Ok(StaticResponse { response: res, action })
}

/// Parses a single `bytes=a-b` range; multi-range requests (containing a
/// comma) fall back to a full-body response by returning `None`.
fn parse_single_range(header: &str, total_len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;
    if total_len == 0 {
        return None;
    }
    let end_default = total_len - 1;
    match (start_s.parse::<u64>(), end_s.parse::<u64>()) {
        (Ok(s), Ok(e)) if s <= e && e < total_len => Some((s, e)),
        (Ok(s), Err(_)) if s < total_len => Some((s, end_default)),
        (Err(_), Ok(suffix_len)) if suffix_len > 0 => {
            let s = total_len.saturating_sub(suffix_len);
            Some((s, end_default))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_range() {
        assert_eq!(parse_single_range("bytes=0-99", 1000), Some((0, 99)));
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_single_range("bytes=500-", 1000), Some((500, 999)));
    }

    #[test]
    fn parses_suffix_range() {
        assert_eq!(parse_single_range("bytes=-100", 1000), Some((900, 999)));
    }

    #[test]
    fn multi_range_falls_back() {
        assert_eq!(parse_single_range("bytes=0-10,20-30", 1000), None);
    }
}
