//! Integration tests for `SessionStore` and `MessageStore`

use kodegen_agent_core::store::{FORK_TITLE_PREFIX, MessageRepository, MessageStore, SessionStore};
use kodegen_agent_core::types::{ContentPart, CreateMessageParams, MessageId, MessageRole, SessionId};
use kodegen_agent_core::{Broker, CoreError, EventType, Message};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn text(role: MessageRole, body: &str) -> CreateMessageParams {
    CreateMessageParams::text(role, body)
}

// ============================================================================
// Messages
// ============================================================================

#[test]
fn test_messages_keep_insertion_order() {
    let store = MessageStore::new();
    let session = SessionId::new("s1");

    let first = store.create(&session, text(MessageRole::User, "hello"));
    let second = store.create(&session, text(MessageRole::Assistant, "hi there"));

    let listed = store.list(&session);
    assert_eq!(listed, vec![first.clone(), second]);
    assert_eq!(store.count(&session), 2);
    assert_eq!(store.get(&session, &first.id).unwrap().content(), "hello");
}

#[test]
fn test_list_is_a_copy() {
    let store = MessageStore::new();
    let session = SessionId::new("s1");
    store.create(&session, text(MessageRole::User, "hello"));

    let mut listed = store.list(&session);
    listed[0].parts.clear();
    listed.clear();

    let again = store.list(&session);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].content(), "hello");
}

#[test]
fn test_update_replaces_parts() {
    let store = MessageStore::new();
    let session = SessionId::new("s1");
    let message = store.create(&session, text(MessageRole::Assistant, "draft"));

    let mut edited = message.clone();
    edited.parts.push(ContentPart::Text {
        text: "more".to_string(),
    });
    edited.model = Some("model-x".to_string());
    let updated = store.update(&edited).unwrap();

    assert_eq!(updated.content(), "draft\nmore");
    assert_eq!(updated.model.as_deref(), Some("model-x"));
    assert_eq!(updated.created_at, message.created_at);
    assert!(updated.updated_at >= updated.created_at);
    assert_eq!(store.get(&session, &message.id).unwrap(), updated);
}

#[test]
fn test_update_and_delete_missing() {
    let store = MessageStore::new();
    let session = SessionId::new("s1");
    let message = store.create(&session, text(MessageRole::User, "x"));

    let mut stray = message.clone();
    stray.id = MessageId::new("missing");
    assert!(matches!(store.update(&stray), Err(CoreError::MessageNotFound(_))));
    assert!(matches!(
        store.delete(&session, &stray.id),
        Err(CoreError::MessageNotFound(_))
    ));
    assert!(matches!(
        store.get(&SessionId::new("other"), &message.id),
        Err(CoreError::MessageNotFound(_))
    ));
}

#[test]
fn test_delete_session_and_clear() {
    let store = MessageStore::new();
    let a = SessionId::new("a");
    let b = SessionId::new("b");
    for i in 0..3 {
        store.create(&a, text(MessageRole::User, &i.to_string()));
    }
    store.create(&b, text(MessageRole::User, "b"));

    assert_eq!(store.delete_session(&a), 3);
    assert!(store.list(&a).is_empty());
    assert_eq!(store.count(&b), 1);

    store.clear();
    assert_eq!(store.count(&b), 0);
}

#[tokio::test]
async fn test_message_events() {
    let broker: Broker<Message> = Broker::new();
    let mut events = broker.subscribe();
    let store = MessageStore::with_broker(broker);
    let session = SessionId::new("s1");

    let message = store.create(&session, text(MessageRole::User, "x"));
    store.update(&message).unwrap();
    store.delete(&session, &message.id).unwrap();

    let kinds: Vec<EventType> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![EventType::Created, EventType::Updated, EventType::Deleted]
    );
}

async fn append_and_read<R: MessageRepository>(repo: &R, session: &SessionId) -> Vec<Message> {
    let created = repo
        .create(session, text(MessageRole::User, "via trait"))
        .await
        .unwrap();
    assert_eq!(repo.get(session, &created.id).await.unwrap(), created);
    repo.list(session).await.unwrap()
}

#[tokio::test]
async fn test_repository_trait() {
    let store = MessageStore::new();
    let session = SessionId::new("s1");

    let listed = append_and_read(&store, &session).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].content(), "via trait");

    MessageRepository::delete(&store, &session, &listed[0].id)
        .await
        .unwrap();
    assert_eq!(store.count(&session), 0);
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_session_crud() {
    let store = SessionStore::new();
    let session = store.create("first chat");
    assert_eq!(store.get(&session.id).unwrap(), session);
    assert!(!session.is_child());

    let mut changed = session.clone();
    changed.prompt_tokens = 120;
    changed.cost = 0.25;
    let updated = store.update(&changed).unwrap();
    assert_eq!(updated.prompt_tokens, 120);

    store.delete(&session.id).unwrap();
    assert!(matches!(
        store.get(&session.id),
        Err(CoreError::SessionNotFound(_))
    ));
    assert!(matches!(
        store.update(&changed),
        Err(CoreError::SessionNotFound(_))
    ));
    assert!(matches!(
        store.delete(&session.id),
        Err(CoreError::SessionNotFound(_))
    ));
}

#[test]
fn test_sessions_listed_newest_first() {
    let store = SessionStore::new();
    let older = store.create("older");
    std::thread::sleep(Duration::from_millis(5));
    let newer = store.create("newer");

    let titles: Vec<String> = store.list().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, vec!["newer", "older"]);
    assert!(newer.created_at > older.created_at);

    store.clear();
    assert!(store.list().is_empty());
}

#[test]
fn test_fork_copies_history_before_message() {
    let sessions = SessionStore::new();
    let messages = MessageStore::new();
    let source = sessions.create("debugging");

    let m1 = messages.create(&source.id, text(MessageRole::User, "one"));
    let m2 = messages.create(&source.id, text(MessageRole::Assistant, "two"));
    let m3 = messages.create(&source.id, text(MessageRole::User, "three"));

    let forked = sessions.fork(&source.id, &m3.id, &messages).unwrap();

    assert_eq!(forked.title, format!("{FORK_TITLE_PREFIX}debugging"));
    assert_ne!(forked.id, source.id);
    assert_eq!(forked.message_count, 2);

    let copied = messages.list(&forked.id);
    let contents: Vec<String> = copied.iter().map(Message::content).collect();
    assert_eq!(contents, vec!["one", "two"]);
    assert!(copied.iter().all(|m| m.session_id == forked.id));
    assert!(copied.iter().all(|m| m.id != m1.id && m.id != m2.id));
    assert_eq!(copied[1].role, MessageRole::Assistant);

    // Source is untouched
    assert_eq!(messages.count(&source.id), 3);
    assert_eq!(sessions.get(&source.id).unwrap(), source);
}

#[test]
fn test_fork_errors() {
    let sessions = SessionStore::new();
    let messages = MessageStore::new();
    let source = sessions.create("a");
    let stray = messages.create(&SessionId::new("elsewhere"), text(MessageRole::User, "x"));

    assert!(matches!(
        sessions.fork(&SessionId::new("missing"), &stray.id, &messages),
        Err(CoreError::SessionNotFound(_))
    ));
    assert!(matches!(
        sessions.fork(&source.id, &stray.id, &messages),
        Err(CoreError::MessageNotFound(_))
    ));
    assert_eq!(sessions.list().len(), 1);
}

#[test]
fn test_fork_at_first_message_is_empty() {
    let sessions = SessionStore::new();
    let messages = MessageStore::new();
    let source = sessions.create("a");
    let first = messages.create(&source.id, text(MessageRole::User, "x"));

    let forked = sessions.fork(&source.id, &first.id, &messages).unwrap();
    assert!(messages.list(&forked.id).is_empty());
}

#[tokio::test]
async fn test_session_events() {
    let broker = Broker::new();
    let mut events = broker.subscribe();
    let store = SessionStore::with_broker(broker);

    let parent = store.create("main");
    let child = store.create_child(&parent.id, "task").unwrap();
    store.delete(&child.id).unwrap();

    let seen: Vec<(EventType, String)> = std::iter::from_fn(|| events.try_recv())
        .map(|e| (e.event_type, e.payload.title))
        .collect();
    assert_eq!(
        seen,
        vec![
            (EventType::Created, "main".to_string()),
            (EventType::Created, "task".to_string()),
            (EventType::Deleted, "task".to_string()),
        ]
    );
}
