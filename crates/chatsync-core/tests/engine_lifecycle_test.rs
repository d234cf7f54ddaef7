use chatsync_core::{
    LocalTransport, Message, MessageRole, MessageSummary, Project, ProjectDeletion, RetryConfig,
    SyncConfig, SyncEngine, SyncError, SyncEvent, Thread, ThreadPatch, Topic,
};
use chatsync_persist::{EntityKind, InMemoryRemoteStore, PersistError, RemoteStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> SyncConfig {
    SyncConfig::default().with_retry(RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
    })
}

fn engine_with(remote: Arc<InMemoryRemoteStore>) -> SyncEngine {
    SyncEngine::new(remote, Arc::new(LocalTransport::default()), fast_config())
}

async fn next_warning(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> chatsync_core::SyncWarning {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let SyncEvent::SyncWarning(warning) = rx.recv().await.expect("event bus closed") {
                return warning;
            }
        }
    })
    .await
    .expect("no sync warning emitted")
}

#[tokio::test]
async fn test_initialize_hydrates_from_remote() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.upsert_thread(Thread::new("t1", "u1").with_title("Recipes")).await.unwrap();
    remote
        .upsert_message(Message::user("t1", "Pasta?").with_user_id("u1"))
        .await
        .unwrap();
    remote.upsert_project(Project::new("u1", "Cooking")).await.unwrap();
    remote.upsert_thread(Thread::new("t2", "someone-else")).await.unwrap();

    let engine = engine_with(remote);
    assert_eq!(engine.user_id(), None);
    engine.initialize("u1").await.unwrap();

    assert_eq!(engine.user_id().as_deref(), Some("u1"));
    let threads = engine.get_threads();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].display_title("New Chat"), "Recipes");
    assert_eq!(engine.get_messages_by_thread_id("t1").len(), 1);
    assert_eq!(engine.get_projects().len(), 1);
}

#[tokio::test]
async fn test_transient_failure_becomes_warning_after_retries() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.fail_next(PersistError::Unavailable("503".to_string()));
    remote.fail_next(PersistError::Unavailable("503".to_string()));

    let engine = engine_with(remote.clone());
    engine.initialize("u1").await.unwrap();
    let mut rx = engine.events();

    engine.create_thread(Thread::new("t1", "")).unwrap();

    let warning = next_warning(&mut rx).await;
    assert_eq!(warning.operation, "upsert_thread");
    assert_eq!(warning.entity, EntityKind::Thread);
    assert_eq!(warning.attempts, 2);
    assert!(!warning.permanent);

    // The local cache keeps the mutation
    assert!(engine.get_thread("t1").is_some());
}

#[tokio::test]
async fn test_rejected_write_is_not_retried() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.fail_next(PersistError::Rejected("forbidden".to_string()));

    let engine = engine_with(remote.clone());
    engine.initialize("u1").await.unwrap();
    let mut rx = engine.events();

    engine.create_project(Project::new("", "Work")).unwrap();

    let warning = next_warning(&mut rx).await;
    assert!(warning.permanent);
    assert_eq!(warning.attempts, 1);
    assert_eq!(remote.write_count(), 1);
}

#[tokio::test]
async fn test_later_writes_proceed_after_a_warning() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.fail_next(PersistError::Rejected("forbidden".to_string()));

    let engine = engine_with(remote.clone());
    engine.initialize("u1").await.unwrap();

    engine.create_thread(Thread::new("t1", "")).unwrap();
    engine.create_thread(Thread::new("t2", "")).unwrap();
    engine.shutdown().await;

    let ids: Vec<String> = remote.list_threads("u1").await.unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["t2".to_string()]);
}

#[tokio::test]
async fn test_delete_project_cascades_to_threads() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let engine = engine_with(remote.clone());
    engine.initialize("u1").await.unwrap();

    let project = engine.create_project(Project::new("", "Work")).unwrap();
    engine.create_thread(Thread::new("t1", "").with_project(project.id.clone())).unwrap();
    engine.create_message(Message::user("t1", "Quarterly report")).unwrap();
    engine.create_thread(Thread::new("t2", "")).unwrap();

    engine.delete_project(&project.id, ProjectDeletion::CascadeThreads).unwrap();

    assert!(engine.get_projects().is_empty());
    let ids: Vec<String> = engine.get_threads().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["t2".to_string()]);
    assert!(engine.get_messages_by_thread_id("t1").is_empty());

    engine.shutdown().await;
    assert!(remote.list_projects("u1").await.unwrap().is_empty());
    assert_eq!(remote.list_threads("u1").await.unwrap().len(), 1);
    assert!(remote.get_messages("t1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_project_reassigns_threads() {
    let engine = engine_with(Arc::new(InMemoryRemoteStore::new()));
    engine.initialize("u1").await.unwrap();

    let old = engine.create_project(Project::new("", "Old")).unwrap();
    let new = engine.create_project(Project::new("", "New")).unwrap();
    engine.create_thread(Thread::new("t1", "").with_project(old.id.clone())).unwrap();
    engine.create_message(Message::user("t1", "Keep me")).unwrap();

    engine
        .delete_project(&old.id, ProjectDeletion::ReassignTo(new.id.clone()))
        .unwrap();

    let thread = engine.get_thread("t1").unwrap();
    assert_eq!(thread.project_id.as_deref(), Some(new.id.as_str()));
    assert_eq!(engine.get_messages_by_thread_id("t1").len(), 1);
    assert_eq!(engine.get_projects().len(), 1);
}

#[tokio::test]
async fn test_thread_project_must_exist() {
    let engine = engine_with(Arc::new(InMemoryRemoteStore::new()));
    engine.initialize("u1").await.unwrap();
    engine.create_thread(Thread::new("t1", "")).unwrap();

    let result = engine.update_thread("t1", ThreadPatch::new().project(Some("missing".to_string())));
    assert!(matches!(result, Err(SyncError::ProjectNotFound(_))));

    let result = engine.create_thread(Thread::new("t2", "").with_project("missing"));
    assert!(matches!(result, Err(SyncError::ProjectNotFound(_))));
}

#[tokio::test]
async fn test_delete_thread_emits_one_event_per_topic() {
    let engine = engine_with(Arc::new(InMemoryRemoteStore::new()));
    engine.initialize("u1").await.unwrap();

    let first = engine.create_message(Message::user("t1", "Hi")).unwrap();
    engine.create_message(Message::assistant("t1", "Hello")).unwrap();
    engine
        .create_message_summary(MessageSummary::new("t1", first.id, MessageRole::User, "greeting"))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _subs: Vec<_> = Topic::ALL
        .into_iter()
        .map(|topic| {
            let sink = Arc::clone(&seen);
            engine.on(topic, move |event| {
                sink.lock().push(event.topic());
                Ok(())
            })
        })
        .collect();

    engine.delete_thread("t1").unwrap();

    assert_eq!(
        *seen.lock(),
        vec![Topic::ThreadsUpdated, Topic::MessagesUpdated, Topic::SummariesUpdated]
    );
}

#[tokio::test]
async fn test_handlers_can_be_removed_with_off() {
    let engine = engine_with(Arc::new(InMemoryRemoteStore::new()));
    engine.initialize("u1").await.unwrap();

    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let sub = engine.on(Topic::ThreadsUpdated, move |_| {
        *counter.lock() += 1;
        Ok(())
    });

    engine.create_thread(Thread::new("t1", "")).unwrap();
    assert!(engine.off(Topic::ThreadsUpdated, sub.id()));
    engine.create_thread(Thread::new("t2", "")).unwrap();

    assert_eq!(*calls.lock(), 1);
}

#[tokio::test]
async fn test_clear_local_data_empties_every_view() {
    let engine = engine_with(Arc::new(InMemoryRemoteStore::new()));
    engine.initialize("u1").await.unwrap();

    engine.create_project(Project::new("", "Work")).unwrap();
    let message = engine.create_message(Message::user("t1", "Hi")).unwrap();
    engine
        .create_message_summary(MessageSummary::new("t1", message.id, MessageRole::User, "hi"))
        .unwrap();
    engine.start_streaming("t1", "a1").unwrap();
    engine.update_streaming_content("t1", "a1", "Hel").unwrap();

    engine.clear_local_data();

    assert_eq!(engine.user_id(), None);
    assert!(engine.get_threads().is_empty());
    assert!(engine.get_projects().is_empty());
    assert!(engine.get_messages_by_thread_id("t1").is_empty());
    assert!(engine.get_message_summaries_with_role("t1").is_empty());
    assert!(engine.get_streaming_state("t1").is_none());
    assert_eq!(engine.message_phase("a1"), None);

    let result = engine.create_message(Message::user("t1", "Again"));
    assert!(matches!(result, Err(SyncError::NotInitialized)));
}

#[tokio::test]
async fn test_switching_users_drops_previous_data() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.upsert_thread(Thread::new("theirs", "u2")).await.unwrap();

    let engine = engine_with(remote);
    engine.initialize("u1").await.unwrap();
    engine.create_thread(Thread::new("mine", "")).unwrap();

    engine.initialize("u2").await.unwrap();

    let ids: Vec<String> = engine.get_threads().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["theirs".to_string()]);
}

#[tokio::test]
async fn test_reinitialize_keeps_remote_writes_in_order() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let engine = engine_with(remote.clone());
    engine.initialize("u1").await.unwrap();

    for _ in 0..3 {
        remote.fail_next(PersistError::Unavailable("503".to_string()));
    }
    let doomed = engine.create_message(Message::user("t1", "doomed")).unwrap();

    // Same user again while the upsert is still retrying
    engine.initialize("u1").await.unwrap();
    engine
        .delete_trailing_messages("t1", doomed.created_at - chrono::Duration::milliseconds(1), false)
        .unwrap();
    engine.shutdown().await;

    let remaining = remote.get_messages("t1").await.unwrap();
    assert!(remaining.iter().all(|m| m.id != doomed.id));
    assert!(engine.get_messages_by_thread_id("t1").is_empty());
}

#[tokio::test]
async fn test_user_switch_flushes_previous_writes_first() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let engine = engine_with(remote.clone());
    engine.initialize("u1").await.unwrap();

    remote.fail_next(PersistError::Unavailable("503".to_string()));
    engine.create_thread(Thread::new("shared", "")).unwrap();

    engine.initialize("u2").await.unwrap();
    engine.create_thread(Thread::new("shared", "").with_title("Mine now")).unwrap();
    engine.shutdown().await;

    let threads = remote.list_threads("u2").await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].metadata.title.as_deref(), Some("Mine now"));
    assert_eq!(remote.write_count(), 3);
}

#[tokio::test]
async fn test_realtime_changes_merge_after_reconnect() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let reader = engine_with(remote.clone());
    let writer = engine_with(remote.clone());
    reader.initialize("u1").await.unwrap();
    writer.initialize("u1").await.unwrap();

    remote.disconnect_subscribers();
    writer.create_thread(Thread::new("during", "")).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while reader.get_thread("during").is_none() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reader.get_thread("during").is_some());

    writer.create_thread(Thread::new("after", "")).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while reader.get_thread("after").is_none() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reader.get_thread("after").is_some());
}
