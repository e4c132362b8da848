//! CLI flag surface mirroring the classic uhttpd getopt options. Flags
//! take precedence over anything set by a loaded config file.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::parser::apply_config_file;
use crate::config::types::{BindSpec, Config, Interpreter};
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "embedhttpd", about = "A small embeddable HTTP/1.x static + CGI server")]
pub struct Cli {
    /// Bind a plain HTTP listener, `[addr:]port`.
    #[arg(short = 'p', value_name = "[addr:]port")]
    pub listen: Vec<String>,

    /// Bind a TLS listener, `[addr:]port`.
    #[arg(short = 's', value_name = "[addr:]port")]
    pub listen_tls: Vec<String>,

    /// TLS certificate file (PEM).
    #[arg(short = 'C', value_name = "path")]
    pub cert: Option<PathBuf>,

    /// TLS private key file (PEM).
    #[arg(short = 'K', value_name = "path")]
    pub key: Option<PathBuf>,

    /// Document root.
    #[arg(short = 'h', value_name = "path")]
    pub home: Option<PathBuf>,

    /// URL invoked in place of a canned 404 body.
    #[arg(short = 'E', value_name = "url")]
    pub error_handler: Option<String>,

    /// Directory index file name.
    #[arg(short = 'I', value_name = "name")]
    pub index_file: Option<String>,

    /// Disable symlink following outside the document root.
    #[arg(short = 'S')]
    pub no_symlinks: bool,

    /// Disable directory listings.
    #[arg(short = 'D')]
    pub no_dirlist: bool,

    /// Reject RFC1918 peers on a non-RFC1918 listener.
    #[arg(short = 'R')]
    pub rfc1918_filter: bool,

    /// Max concurrent requests per listener.
    #[arg(short = 'n', value_name = "n")]
    pub max_requests: Option<usize>,

    /// CGI URL prefix.
    #[arg(short = 'x', value_name = "prefix")]
    pub cgi_prefix: Option<String>,

    /// Interpreter binding, `.ext=/path/to/binary`.
    #[arg(short = 'i', value_name = ".ext=path")]
    pub interpreter: Vec<String>,

    /// CGI script wall-clock timeout, seconds.
    #[arg(short = 't', value_name = "sec")]
    pub script_timeout: Option<u64>,

    /// Network idle timeout, seconds.
    #[arg(short = 'T', value_name = "sec")]
    pub network_timeout: Option<u64>,

    /// TCP keepalive interval, seconds (enables SO_KEEPALIVE when set).
    #[arg(short = 'A', value_name = "sec")]
    pub keepalive: Option<u64>,

    /// Stay in the foreground. Always true in this implementation; kept
    /// for flag compatibility with embedding deployments.
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Load additional directives from a config file.
    #[arg(short = 'c', value_name = "path")]
    pub config_file: Option<PathBuf>,

    /// Basic-auth realm name.
    #[arg(short = 'r', value_name = "realm")]
    pub realm: Option<String>,

    /// Percent-decode the given string and exit.
    #[arg(short = 'd', value_name = "string")]
    pub urldecode: Option<String>,

    /// Hash the given string with the default credential scheme and exit.
    #[arg(short = 'm', value_name = "string")]
    pub hash: Option<String>,
}

impl Cli {
    /// Builds a `Config` by applying `-c`'s file first, then overlaying
    /// every CLI flag that was actually supplied.
    pub fn build_config(&self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(path) = &self.config_file {
            apply_config_file(&mut config, path)?;
        }

        for spec in &self.listen {
            config.binds.push(parse_bind(spec, false)?);
        }
        for spec in &self.listen_tls {
            config.binds.push(parse_bind(spec, true)?);
        }
        if let Some(home) = &self.home {
            config.document_root = home.clone();
        }
        if let Some(url) = &self.error_handler {
            config.error_handler = Some(url.clone());
        }
        if let Some(name) = &self.index_file {
            config.index_file = Some(name.clone());
        }
        if self.no_symlinks {
            config.follow_symlinks = false;
        }
        if self.no_dirlist {
            config.allow_dirlist = false;
        }
        if self.rfc1918_filter {
            config.rfc1918_filter = true;
        }
        if let Some(n) = self.max_requests {
            config.max_requests = n;
        }
        if let Some(prefix) = &self.cgi_prefix {
            config.cgi_prefix = prefix.clone();
        }
        for entry in &self.interpreter {
            if let Some((ext, bin)) = entry.split_once('=') {
                config.interpreters.push(Interpreter { extension: ext.to_string(), binary: PathBuf::from(bin) });
            }
        }
        if let Some(t) = self.script_timeout {
            config.script_timeout_s = t;
        }
        if let Some(t) = self.network_timeout {
            config.network_timeout_s = t;
        }
        if let Some(t) = self.keepalive {
            config.tcp_keepalive_s = Some(t);
        }
        if let Some(r) = &self.realm {
            config.realm = r.clone();
        }
        config.cert_file = self.cert.clone();
        config.key_file = self.key.clone();

        if config.binds.is_empty() {
            config.binds.push(BindSpec { addr: "0.0.0.0".parse().unwrap(), port: 8080, tls: false });
        }

        Ok(config)
    }
}

fn parse_bind(spec: &str, tls: bool) -> Result<BindSpec> {
    let (addr, port) = match spec.rsplit_once(':') {
        Some((addr, port)) => (addr.parse::<IpAddr>().map_err(|e| crate::error::Error::Config(e.to_string()))?, port),
        None => ("0.0.0.0".parse().unwrap(), spec.as_str()),
    };
    let port: u16 = port.parse().map_err(|_| crate::error::Error::Config(format!("invalid port in '{spec}'")))?;
    Ok(BindSpec { addr, port, tls })
}
