use cowatch_common::protocol::ws::CLIENT_EVENT_NAMES;
use serde_json::Value;

const WS_SESSION_SOURCE: &str = include_str!("../src/ws/session.rs");
const WS_HANDLER_SOURCE: &str = include_str!("../src/ws/handler.rs");
const WS_ROUTER_SOURCE: &str = include_str!("../src/ws/mod.rs");
const VALIDATION_SOURCE: &str = include_str!("../src/validation.rs");
const ERROR_SOURCE: &str = include_str!("../src/error.rs");

fn load_contract() -> Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts/timeline-events.json");
    let content = std::fs::read_to_string(path).expect("contract file should be readable");
    serde_json::from_str(&content).expect("contract file should be valid JSON")
}

#[test]
fn heartbeat_constants_match_contract() {
    let contract = load_contract();
    let interval = parse_duration_secs(WS_SESSION_SOURCE, "HEARTBEAT_INTERVAL");
    let timeout = parse_duration_secs(WS_SESSION_SOURCE, "HEARTBEAT_TIMEOUT");

    assert_eq!(Some(interval), contract["transport"]["heartbeat_interval_secs"].as_u64());
    assert_eq!(Some(timeout), contract["transport"]["heartbeat_timeout_secs"].as_u64());
    assert!(timeout > interval, "a connection must survive at least one missed pong");
}

#[test]
fn frame_limit_matches_contract() {
    let contract = load_contract();
    let max_frame_bytes = parse_product_const(VALIDATION_SOURCE, "MAX_WS_FRAME_BYTES");

    assert_eq!(Some(max_frame_bytes), contract["transport"]["max_frame_bytes"].as_u64());
    assert_eq!(contract["transport"]["oversized_close_code"].as_u64(), Some(1009));
    assert!(WS_HANDLER_SOURCE.contains("close_frame_too_large"));
}

#[test]
fn websocket_path_matches_contract() {
    let contract = load_contract();
    let path = contract["transport"]["path"].as_str().expect("path should be a string");
    assert!(WS_ROUTER_SOURCE.contains(&format!(".route(\"{path}\"")));
}

#[test]
fn every_client_event_is_dispatched() {
    for name in CLIENT_EVENT_NAMES {
        let variant = pascal_case(name);
        assert!(
            WS_HANDLER_SOURCE.contains(&format!("ClientEvent::{variant}")),
            "handler must dispatch `{name}`"
        );
    }
}

#[test]
fn error_codes_match_contract() {
    let contract = load_contract();
    let codes = contract["error_codes"].as_array().expect("error_codes should be an array");
    for code in codes {
        let code = code.as_str().expect("error code should be a string");
        assert!(ERROR_SOURCE.contains(&format!("\"{code}\"")), "error code `{code}` is not mapped");
    }
}

fn pascal_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn const_line<'a>(source: &'a str, name: &str) -> &'a str {
    let needle = format!("const {name}:");
    let index = source.find(&needle).unwrap_or_else(|| panic!("constant `{name}` must be declared"));
    source[index..].lines().next().expect("constant declaration line must exist")
}

fn parse_duration_secs(source: &str, name: &str) -> u64 {
    let line = const_line(source, name);
    let start = line.find("from_secs(").expect("duration must use Duration::from_secs") + 10;
    let end = line[start..].find(')').expect("from_secs call must close") + start;
    line[start..end]
        .replace('_', "")
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}

fn parse_product_const(source: &str, name: &str) -> u64 {
    let line = const_line(source, name);
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .split('*')
        .map(|factor| {
            factor
                .trim()
                .parse::<u64>()
                .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
        })
        .product()
}
