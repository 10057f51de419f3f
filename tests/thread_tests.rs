use serde_json::json;
use unichat::{ContentBlock, Error, Message, Role, Thread};

#[test]
fn test_ingest_appends_in_order() {
    let mut thread = Thread::new();
    assert!(thread.is_empty());

    thread.ingest(vec![Message::system("rules"), Message::user("hi")]);
    thread.ingest(vec![Message::user("again")]);

    let roles: Vec<Role> = thread.history().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User]);
}

#[test]
fn test_ingest_drops_repeated_system_preamble() {
    let mut thread = Thread::new();
    thread.ingest(vec![
        Message::system("always answer in French"),
        Message::user("a"),
    ]);
    thread.push(Message::assistant("Oui"));
    thread.ingest(vec![
        Message::system("always answer in French"),
        Message::user("b"),
    ]);

    let roles: Vec<Role> = thread.history().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
}

#[test]
fn test_ingest_keeps_changed_preamble() {
    let mut thread = Thread::new();
    thread.ingest(vec![Message::system("v1")]);
    thread.ingest(vec![Message::system("v2")]);

    assert_eq!(thread.history().len(), 2);
}

#[test]
fn test_preamble_roles_not_conflated() {
    let mut thread = Thread::new();
    thread.ingest(vec![Message::system("same text")]);
    thread.ingest(vec![Message::developer("same text")]);
    thread.ingest(vec![Message::developer("same text")]);

    // Same content under a different preamble role is not a duplicate,
    // but the repeated developer message is.
    let roles: Vec<Role> = thread.history().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::Developer]);
}

#[test]
fn test_user_messages_never_deduplicated() {
    let mut thread = Thread::new();
    thread.ingest(vec![Message::user("same")]);
    thread.ingest(vec![Message::user("same")]);

    assert_eq!(thread.history().len(), 2);
}

#[test]
fn test_duplicate_detection_ignores_ids_and_timestamps() {
    let first = Message::system("pinned");
    let second = Message::system("pinned");
    assert_ne!(first.id, second.id);

    let mut thread = Thread::new();
    thread.ingest(vec![first]);
    thread.ingest(vec![second]);
    assert_eq!(thread.history().len(), 1);
}

#[test]
fn test_push_never_deduplicates() {
    let mut thread = Thread::new();
    thread.push(Message::system("pinned"));
    thread.push(Message::system("pinned"));

    assert_eq!(thread.history().len(), 2);
}

#[test]
fn test_previous_response_id_round_trip() {
    let mut thread = Thread::new();
    assert!(thread.previous_response_id().is_none());

    thread.set_previous_response_id("resp_123").unwrap();
    assert_eq!(thread.previous_response_id(), Some("resp_123"));

    thread.clear_previous_response_id();
    assert!(thread.previous_response_id().is_none());
}

#[test]
fn test_blank_previous_response_id_rejected() {
    let mut thread = Thread::new();
    let err = thread.set_previous_response_id("   ").unwrap_err();
    assert!(matches!(err, Error::Thread(_)));
    assert!(thread.previous_response_id().is_none());
}

#[test]
fn test_build_request_context_does_not_mutate() {
    let mut thread = Thread::new();
    thread.ingest(vec![Message::system("rules"), Message::user("q1")]);
    thread.push(Message::assistant("a1"));
    thread.set_previous_response_id("resp_9").unwrap();

    let context = thread.build_request_context(&[Message::system("rules"), Message::user("q2")]);

    // The context sees the deduplicated view plus the new user message.
    let roles: Vec<Role> = context.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(context.previous_response_id.as_deref(), Some("resp_9"));

    // The thread itself is untouched.
    assert_eq!(thread.history().len(), 3);
}

#[test]
fn test_thread_serialization_round_trip() {
    let mut thread = Thread::new();
    thread.ingest(vec![Message::system("rules"), Message::user("compute 2+2")]);
    thread.push(Message::assistant_blocks(vec![ContentBlock::ToolUse {
        id: "call_1".to_string(),
        name: "calc".to_string(),
        input: json!({"expr": "2+2"}),
    }]));
    thread.push(Message::tool_results(vec![ContentBlock::ToolResult {
        tool_use_id: "call_1".to_string(),
        is_error: false,
        content: json!(4),
    }]));
    thread.push(Message::assistant("It is 4."));
    thread.set_previous_response_id("resp_42").unwrap();

    let serialized = serde_json::to_string(&thread).unwrap();
    let restored: Thread = serde_json::from_str(&serialized).unwrap();

    assert_eq!(restored.history().len(), thread.history().len());
    assert_eq!(restored.previous_response_id(), Some("resp_42"));
    for (original, restored) in thread.history().iter().zip(restored.history()) {
        assert_eq!(original, restored);
    }
    assert_eq!(restored.history()[4].text(), "It is 4.");
}
