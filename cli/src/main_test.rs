#![allow(clippy::float_cmp)]

use pinboard::{Action, Pin, User};

use super::*;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

fn pin(id: &str) -> Pin {
    Pin {
        id: id.to_owned(),
        created_at: 0,
        title: String::new(),
        image: String::new(),
        content: String::new(),
        latitude: 0.0,
        longitude: 0.0,
        author: User { id: "u1".to_owned(), ..User::default() },
        comments: Vec::new(),
    }
}

// =============================================================
// Flags
// =============================================================

#[test]
fn viewport_flags_feed_config() {
    let cli = parse(&[
        "pinwatch",
        "--default-latitude",
        "51.5",
        "--default-longitude",
        "-0.12",
        "--default-zoom",
        "10",
        "watch",
    ]);
    let viewport = cli.config().unwrap().default_viewport;
    assert_eq!(viewport.latitude, 51.5);
    assert_eq!(viewport.longitude, -0.12);
    assert_eq!(viewport.zoom, 10.0);
}

#[test]
fn viewport_flags_are_accepted_after_subcommand() {
    let cli = parse(&["pinwatch", "pins", "--default-longitude", "-122.5"]);
    assert_eq!(cli.config().unwrap().default_viewport.longitude, -122.5);
}

#[test]
fn malformed_viewport_flag_is_rejected_by_config() {
    let cli = parse(&["pinwatch", "--default-zoom", "close", "me"]);
    assert!(matches!(
        cli.config(),
        Err(CliError::Config(pinboard::ConfigError::InvalidNumber { key: "PINBOARD_DEFAULT_ZOOM", .. }))
    ));
}

#[test]
fn endpoint_flags_feed_config() {
    let cli = parse(&["pinwatch", "--graphql-url", "https://pins.example/graphql", "me"]);
    let config = cli.config().unwrap();
    assert_eq!(config.graphql_url, "https://pins.example/graphql");
    assert_eq!(config.ws_url, "wss://pins.example/graphql");
}

// =============================================================
// Delete target
// =============================================================

#[test]
fn unknown_pin_is_reported_as_not_found() {
    let mut store = PinStore::new();
    store.dispatch(Action::GetPins(vec![pin("a")]));

    let err = select_known(&mut store, "missing").unwrap_err();

    assert!(matches!(err, CliError::PinNotFound(ref id) if id == "missing"));
    assert_eq!(err.to_string(), "pin missing not found");
    assert!(store.state().popup.is_none());
}

#[test]
fn known_pin_opens_popup() {
    let mut store = PinStore::new();
    store.dispatch(Action::GetPins(vec![pin("a")]));
    select_known(&mut store, "a").unwrap();
    assert_eq!(store.state().popup.as_deref(), Some("a"));
}
