use serde_json::json;
use wire::{GraphqlError, GraphqlResponse};

use super::*;

fn data(id: &str, data: Value) -> ServerMessage {
    ServerMessage::Data { id: id.to_owned(), payload: GraphqlResponse { data: Some(data), errors: Vec::new() } }
}

#[test]
fn subscription_ids_are_channel_fields() {
    for kind in ChannelKind::ALL {
        assert_eq!(kind_for(kind.field()), Some(kind));
    }
    assert_eq!(kind_for("1"), None);
}

#[test]
fn data_routes_to_its_channel() {
    let payload = json!({ "pinDeleted": { "_id": "a" } });
    match route(data("pinDeleted", payload.clone())) {
        Route::Deliver(ChannelKind::Deleted, Ok(value)) => assert_eq!(value, payload),
        other => panic!("unexpected route {other:?}"),
    }
}

#[test]
fn data_with_errors_is_skipped() {
    let message = ServerMessage::Data {
        id: "pinAdded".to_owned(),
        payload: GraphqlResponse { data: None, errors: vec![GraphqlError { message: "denied".to_owned() }] },
    };
    assert!(matches!(route(message), Route::Ignore));
}

#[test]
fn subscription_error_fails_one_channel() {
    let message = ServerMessage::Error { id: "pinUpdated".to_owned(), payload: json!({ "message": "nope" }) };
    assert!(matches!(route(message), Route::Deliver(ChannelKind::Updated, Err(SyncError::Transport(_)))));
}

#[test]
fn complete_finishes_channel() {
    assert!(matches!(route(ServerMessage::Complete { id: "pinAdded".to_owned() }), Route::Finish(ChannelKind::Added)));
    assert!(matches!(route(ServerMessage::Complete { id: "other".to_owned() }), Route::Ignore));
}

#[test]
fn connection_error_fails_everything() {
    let message = ServerMessage::ConnectionError { payload: json!("bad token") };
    assert!(matches!(route(message), Route::FailAll(reason) if reason.contains("bad token")));
}

#[test]
fn keep_alive_is_ignored() {
    assert!(matches!(route(ServerMessage::Ka), Route::Ignore));
    assert!(matches!(route(ServerMessage::ConnectionAck), Route::Ignore));
}

#[test]
fn init_payload_carries_token() {
    assert_eq!(init_payload(Some("t")), json!({ "authToken": "t" }));
    assert_eq!(init_payload(None), json!({}));
}

#[test]
fn handshake_waits_through_keep_alive_until_ack() {
    assert!(!handshake(ServerMessage::Ka).unwrap());
    assert!(handshake(ServerMessage::ConnectionAck).unwrap());
}

#[test]
fn handshake_rejection_carries_payload() {
    let err = handshake(ServerMessage::ConnectionError { payload: json!("expired") }).unwrap_err();
    assert!(matches!(err, CliError::ConnectionRejected(reason) if reason.contains("expired")));
}

#[test]
fn subscription_traffic_before_ack_is_unexpected() {
    let early = [
        data("pinAdded", json!({})),
        ServerMessage::Error { id: "pinAdded".to_owned(), payload: json!({}) },
        ServerMessage::Complete { id: "pinAdded".to_owned() },
    ];
    for message in early {
        let err = handshake(message).unwrap_err();
        assert!(matches!(err, CliError::Codec(CodecError::UnexpectedMessage(_))), "{err}");
    }
}
