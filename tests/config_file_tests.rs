//! Config-file grammar plus CLI-overlay precedence, exercised through the
//! public `Cli` surface rather than the parser internals directly.

use clap::Parser;
use embedhttpd::config::Cli;

#[test]
fn config_file_is_applied_and_cli_flags_override_it() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("embedhttpd.conf");
    std::fs::write(
        &config_path,
        "/admin:root:hunter2\nI:home.html\nE404:/error.html\n*.php:/usr/bin/php-cgi\n",
    )
    .unwrap();

    let cli = Cli::parse_from([
        "embedhttpd",
        "-c",
        config_path.to_str().unwrap(),
        "-I",
        "default.html",
    ]);
    let config = cli.build_config().unwrap();

    assert_eq!(config.auth_realms.len(), 1);
    assert_eq!(config.auth_realms[0].url_prefix, "/admin");
    assert_eq!(config.auth_realms[0].username, "root");
    assert_eq!(config.error_handler.as_deref(), Some("/error.html"));
    assert_eq!(config.interpreters.len(), 1);
    assert_eq!(config.interpreters[0].extension, ".php");

    // The `-I` flag was supplied on the command line, so it wins over the
    // config file's `I:home.html` directive.
    assert_eq!(config.index_file.as_deref(), Some("default.html"));
}

#[test]
fn bind_flags_accept_bare_port_and_addr_port_forms() {
    let cli = Cli::parse_from(["embedhttpd", "-p", "9090", "-p", "127.0.0.1:9091"]);
    let config = cli.build_config().unwrap();

    assert_eq!(config.binds.len(), 2);
    assert_eq!(config.binds[0].port, 9090);
    assert_eq!(config.binds[1].port, 9091);
    assert_eq!(config.binds[1].addr.to_string(), "127.0.0.1");
}
