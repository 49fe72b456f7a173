//! End-to-end template scenarios driven through the builder session.

use matches::assert_matches;
use wirebench_core::session::{Error, Session};
use wirebench_core::template::Diagnostic;
use wirebench_core::{parse_parameters, FieldValues};

fn session_with_test_protocol() -> Session {
    let mut session = Session::new();
    session.start_protocol("TestProtocol").unwrap();
    session.uint(2, "msgId", Some("5")).unwrap();
    session.uint(2, "length", None).unwrap();
    session.pdu("length-4").unwrap();
    session.end_protocol().unwrap();
    session
}

fn foo_request(session: &mut Session) {
    session
        .new_message("FooRequest", "TestProtocol", None)
        .unwrap();
    session.uint(2, "field_1", Some("1")).unwrap();
    session.uint(2, "field_2", Some("2")).unwrap();
}

#[test]
fn encodes_defaults_to_the_golden_bytes() {
    let mut session = session_with_test_protocol();
    foo_request(&mut session);
    let msg = session.encode().unwrap();
    assert_eq!(
        msg.raw().as_ref(),
        &[0x00, 0x05, 0x00, 0x08, 0x00, 0x01, 0x00, 0x02]
    );
    assert_eq!(msg.leaf("_header.length").unwrap().int(), 8);
}

#[test]
fn overridden_fields_expose_all_three_views() {
    let mut session = session_with_test_protocol();
    foo_request(&mut session);
    session.value("field_1", 1024).unwrap();
    let msg = session.encode().unwrap();
    let leaf = msg.leaf("field_1").unwrap();
    assert_eq!(leaf.int(), 1024);
    assert_eq!(leaf.hex(), "0x0400");
    assert_eq!(leaf.bytes(), &[0x04, 0x00]);
}

#[test]
fn validating_an_unknown_field_is_fatal() {
    let mut session = session_with_test_protocol();
    foo_request(&mut session);
    let msg = session.encode().unwrap();
    let err = session.validate(&msg, &[("unknown", "111")]).unwrap_err();
    assert_matches!(err, Error::Validate { .. });
}

#[test]
fn pdu_reference_must_be_declared_first() {
    let mut session = Session::new();
    session.start_protocol("Short").unwrap();
    session.uint(1, "kind", None).unwrap();
    session.uint(2, "other", Some("5")).unwrap();
    let err = session.pdu("length").unwrap_err();
    assert_matches!(err, Error::ProtocolSchema { .. });
}

#[test]
fn defaults_only_messages_print_their_name() {
    let mut session = session_with_test_protocol();
    foo_request(&mut session);
    let msg = session.encode().unwrap();
    assert_eq!(msg.leaf("_header.msgId").unwrap().int(), 5);
    assert_eq!(msg.to_string(), "Message FooRequest");
    assert_eq!(
        msg.dump(),
        "Message FooRequest\n  \
         TestProtocol header\n    \
         msgId = 0x0005\n    \
         length = 0x0008\n  \
         field_1 = 0x0001\n  \
         field_2 = 0x0002\n"
    );
}

#[test]
fn received_bytes_decode_and_validate() {
    let mut session = session_with_test_protocol();
    foo_request(&mut session);
    let sent = session.encode().unwrap();

    let template = session.message_template().unwrap();
    let received = template.decode(sent.raw().clone()).unwrap();
    assert_eq!(received, sent);

    let expectations = FieldValues::from_pairs([("field_1", "1"), ("field_2", "2")]).unwrap();
    assert_eq!(template.validate(&received, &expectations).unwrap(), vec![]);

    let expectations = FieldValues::from_pairs([("field_2", "3")]).unwrap();
    let diagnostics = template.validate(&received, &expectations).unwrap();
    assert_eq!(
        diagnostics,
        vec![Diagnostic::ValueMismatch {
            path: "field_2".into(),
            got: "2".into(),
            expected: "3".into(),
        }]
    );
}

#[test]
fn keyword_parameters_drive_the_session() {
    let mut session = session_with_test_protocol();
    foo_request(&mut session);

    let params =
        parse_parameters(["field_1:1024", "header:msgId:7", "timeout=2.0"]).unwrap();
    assert_eq!(params.configs.len(), 1);

    let fields: Vec<(&str, &str)> = params
        .fields
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let headers: Vec<(&str, &str)> = params
        .headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let msg = session.encode_with(&fields, &headers).unwrap();
    assert_eq!(msg.leaf("field_1").unwrap().int(), 1024);
    assert_eq!(msg.leaf("_header.msgId").unwrap().int(), 7);
}

#[test]
fn mixed_containers_round_trip() {
    let mut session = session_with_test_protocol();
    session
        .new_message("Mixed", "TestProtocol", None)
        .unwrap();
    session.chars("4", "tag", Some("ab")).unwrap();
    session.uint(1, "count", Some("2")).unwrap();
    session.start_list("count", "items").unwrap();
    session.start_struct("pair", None).unwrap();
    session.uint(1, "first", Some("1")).unwrap();
    session.uint(1, "second", Some("2")).unwrap();
    session.end_struct().unwrap();
    session.end_list().unwrap();
    session.start_binary("flags", Some(1)).unwrap();
    session.bin(1, "urgent", Some("0")).unwrap();
    session.bin(7, "kind", Some("3")).unwrap();
    session.end_binary().unwrap();

    session.value("items[0].second", 9).unwrap();
    session.value("flags.urgent", 1).unwrap();
    let msg = session.encode().unwrap();

    assert_eq!(msg.leaf("tag").unwrap().canonical(), "ab");
    assert_eq!(msg.leaf("items[0].second").unwrap().int(), 9);
    assert_eq!(msg.leaf("items[1].first").unwrap().int(), 1);
    assert_eq!(msg.leaf("flags.urgent").unwrap().int(), 1);
    assert_eq!(msg.leaf("flags.kind").unwrap().int(), 3);

    let template = session.message_template().unwrap();
    let decoded = template.decode(msg.raw().clone()).unwrap();
    assert_eq!(decoded, msg);
}
