use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> Config {
    let mut full = vec!["monitor"];
    full.extend_from_slice(args);
    Config::parse_from(full)
}

#[test]
fn defaults_match_spec() {
    let config = parse(&["sync.example.com"]);
    assert_eq!(config.doc, "default");
    assert_eq!(config.name, "mrmd-monitor");
    assert_eq!(config.color, "#10b981");
    assert_eq!(config.log_level, "info");
}

#[test]
fn normalized_sync_url_prepends_ws_when_scheme_is_missing() {
    assert_eq!(parse(&["host:1234"]).normalized_sync_url(), "ws://host:1234");
}

#[test]
fn normalized_sync_url_leaves_explicit_schemes_alone() {
    assert_eq!(parse(&["ws://host"]).normalized_sync_url(), "ws://host");
    assert_eq!(parse(&["wss://host"]).normalized_sync_url(), "wss://host");
}

#[test]
fn validate_rejects_unknown_log_level() {
    let config = parse(&["--log-level", "verbose", "host"]);
    assert!(config.validate().is_err());
}

#[test]
fn validate_accepts_known_log_levels() {
    for level in ["debug", "info", "warn", "error"] {
        let config = parse(&["--log-level", level, "host"]);
        assert!(config.validate().is_ok());
    }
}

#[test]
fn awareness_payload_matches_spec_shape() {
    let config = parse(&["--name", "alice", "--color", "#ff0000", "host"]);
    let awareness = config.awareness();
    assert_eq!(awareness["user"]["name"], "alice");
    assert_eq!(awareness["user"]["color"], "#ff0000");
    assert_eq!(awareness["user"]["type"], "monitor");
}
