use chatsync_types::{ChangeOperation, ChangePayload, EntityKind, Message, RemoteChange, Thread};

#[test]
fn test_remote_change_entity() {
    let change = RemoteChange::inserted(ChangePayload::Message(Message::user("t1", "hi")));
    assert_eq!(change.entity(), EntityKind::Message);
    assert_eq!(change.operation, ChangeOperation::Insert);

    let change = RemoteChange::deleted(EntityKind::Thread, "t1");
    assert_eq!(change.entity(), EntityKind::Thread);
    assert!(change.user_id().is_none());
}

#[test]
fn test_remote_change_wire_format() {
    let change = RemoteChange::updated(ChangePayload::Thread(Thread::new("t1", "u1")));
    let json = serde_json::to_value(&change).unwrap();

    assert_eq!(json["operation"], "update");
    assert_eq!(json["payload"]["entity"], "thread");
    assert_eq!(json["payload"]["id"], "t1");

    let decoded: RemoteChange = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, change);
}

#[test]
fn test_removed_payload_wire_format() {
    let change = RemoteChange::deleted(EntityKind::Project, "p1");
    let json = serde_json::to_value(&change).unwrap();

    assert_eq!(json["payload"]["entity"], "removed");
    assert_eq!(json["payload"]["kind"], "project");
    assert_eq!(json["payload"]["id"], "p1");
}
