use super::*;
use chrono::Duration as ChronoDuration;
use shared::domain::Destination;

async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

fn room_draft(sender: &str, room: &str, body: &str) -> MessageDraft {
    MessageDraft::new(sender, body, Destination::room(room))
}

fn direct_draft(sender: &str, receiver: &str, body: &str) -> MessageDraft {
    MessageDraft::new(sender, body, Destination::direct(receiver))
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = memory_storage().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("messages.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage
        .persist(&room_draft("alice", "general", "hi"), Utc::now())
        .await
        .expect("persist");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let history = reopened.find_by_room("general").await.expect("history");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn persist_records_sender_as_first_delivery() {
    let storage = memory_storage().await;
    let message = storage
        .persist(&room_draft("alice", "general", "hi"), Utc::now())
        .await
        .expect("persist");

    assert!(message.id.0 > 0);
    assert_eq!(message.delivered_to, vec!["alice".to_string()]);
    assert!(message.seen_by.is_empty());
    assert_eq!(message.destination, Destination::room("general"));

    let stored = storage
        .find_by_id(message.id)
        .await
        .expect("lookup")
        .expect("stored message");
    assert_eq!(stored, message);
}

#[tokio::test]
async fn persist_rejects_drafts_without_content() {
    let storage = memory_storage().await;

    let empty = storage
        .persist(&room_draft("alice", "general", "   "), Utc::now())
        .await
        .expect_err("empty body");
    assert!(matches!(
        empty,
        StoreError::Validation(ValidationError::EmptyContent)
    ));

    let anonymous = storage
        .persist(&room_draft("", "general", "hi"), Utc::now())
        .await
        .expect_err("empty sender");
    assert!(matches!(
        anonymous,
        StoreError::Validation(ValidationError::EmptySender)
    ));

    let nowhere = storage
        .persist(&room_draft("alice", " ", "hi"), Utc::now())
        .await
        .expect_err("empty room");
    assert!(matches!(
        nowhere,
        StoreError::Validation(ValidationError::MissingDestination)
    ));

    assert!(storage.find_by_room("general").await.expect("history").is_empty());
}

#[tokio::test]
async fn media_only_message_is_stored() {
    let storage = memory_storage().await;
    let draft = room_draft("alice", "general", "").with_media("https://cdn.example/cat.gif");
    let message = storage.persist(&draft, Utc::now()).await.expect("persist");
    assert!(message.body.is_empty());
    assert_eq!(message.media.as_deref(), Some("https://cdn.example/cat.gif"));
}

#[tokio::test]
async fn room_history_is_ordered_by_creation_time() {
    let storage = memory_storage().await;
    let base = Utc::now();

    storage
        .persist(&room_draft("bob", "general", "second"), base + ChronoDuration::seconds(2))
        .await
        .expect("second");
    storage
        .persist(&room_draft("alice", "general", "first"), base)
        .await
        .expect("first");
    storage
        .persist(&room_draft("carol", "random", "elsewhere"), base + ChronoDuration::seconds(1))
        .await
        .expect("other room");

    let history = storage.find_by_room("general").await.expect("history");
    let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["first", "second"]);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[tokio::test]
async fn conversation_is_symmetric() {
    let storage = memory_storage().await;
    let base = Utc::now();
    storage
        .persist(&direct_draft("alice", "bob", "hey bob"), base)
        .await
        .expect("a->b");
    storage
        .persist(&direct_draft("bob", "alice", "hey alice"), base + ChronoDuration::seconds(1))
        .await
        .expect("b->a");
    storage
        .persist(&direct_draft("alice", "carol", "not for bob"), base)
        .await
        .expect("a->c");
    storage
        .persist(&room_draft("alice", "bob", "a room called bob"), base)
        .await
        .expect("room");

    let forward = storage.find_conversation("alice", "bob").await.expect("a,b");
    let backward = storage.find_conversation("bob", "alice").await.expect("b,a");
    assert_eq!(forward, backward);
    let bodies: Vec<&str> = forward.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["hey bob", "hey alice"]);
}

#[tokio::test]
async fn receipts_are_idempotent() {
    let storage = memory_storage().await;
    let message = storage
        .persist(&room_draft("alice", "general", "hi"), Utc::now())
        .await
        .expect("persist");

    let first = storage.mark_seen(message.id, "carol").await.expect("seen");
    let second = storage.mark_seen(message.id, "carol").await.expect("seen again");
    assert_eq!(first, second);
    assert_eq!(second.seen_by, vec!["carol".to_string()]);

    let delivered = storage
        .mark_delivered(message.id, "carol")
        .await
        .expect("delivered");
    let delivered = storage
        .mark_delivered(delivered.id, "carol")
        .await
        .expect("delivered again");
    assert_eq!(
        delivered.delivered_to,
        vec!["alice".to_string(), "carol".to_string()]
    );
}

#[tokio::test]
async fn seen_does_not_imply_delivered() {
    let storage = memory_storage().await;
    let message = storage
        .persist(&direct_draft("alice", "bob", "hi"), Utc::now())
        .await
        .expect("persist");

    let updated = storage.mark_seen(message.id, "bob").await.expect("seen");
    assert_eq!(updated.seen_by, vec!["bob".to_string()]);
    assert_eq!(updated.delivered_to, vec!["alice".to_string()]);
}

#[tokio::test]
async fn sender_receipts_are_ignored() {
    let storage = memory_storage().await;
    let message = storage
        .persist(&room_draft("alice", "general", "hi"), Utc::now())
        .await
        .expect("persist");

    let seen = storage.mark_seen(message.id, "alice").await.expect("seen");
    assert!(seen.seen_by.is_empty());
    let delivered = storage
        .mark_delivered(message.id, "alice")
        .await
        .expect("delivered");
    assert_eq!(delivered.delivered_to, vec!["alice".to_string()]);
}

#[tokio::test]
async fn receipts_for_unknown_message_are_not_found() {
    let storage = memory_storage().await;
    let err = storage
        .mark_seen(MessageId(404), "carol")
        .await
        .expect_err("unknown");
    assert!(matches!(err, StoreError::NotFound(MessageId(404))));

    let err = storage
        .mark_delivered(MessageId(404), "carol")
        .await
        .expect_err("unknown");
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_receipts_are_all_kept() {
    let storage = memory_storage().await;
    let message = storage
        .persist(&room_draft("alice", "general", "hi"), Utc::now())
        .await
        .expect("persist");

    let readers = ["bob", "carol", "dave", "erin", "frank"];
    let handles: Vec<_> = readers
        .iter()
        .map(|reader| {
            let storage = storage.clone();
            let reader = reader.to_string();
            tokio::spawn(async move { storage.mark_seen(message.id, &reader).await })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join").expect("seen");
    }

    let stored = storage
        .find_by_id(message.id)
        .await
        .expect("lookup")
        .expect("message");
    let mut seen_by = stored.seen_by.clone();
    seen_by.sort();
    assert_eq!(seen_by, vec!["bob", "carol", "dave", "erin", "frank"]);
}

#[tokio::test]
async fn scheduled_time_round_trips_at_millisecond_precision() {
    let storage = memory_storage().await;
    let deadline = Utc::now() + ChronoDuration::seconds(30);
    let draft = room_draft("alice", "general", "later").scheduled_for(deadline);
    let message = storage.persist(&draft, deadline).await.expect("persist");

    assert_eq!(
        message.scheduled_for.map(|at| at.timestamp_millis()),
        Some(deadline.timestamp_millis())
    );
    let history = storage.find_by_room("general").await.expect("history");
    assert_eq!(history, vec![message]);
}

#[tokio::test]
async fn persist_trims_text_fields_so_sender_receipts_still_match() {
    let storage = memory_storage().await;
    let draft = MessageDraft::new(" alice ", "  hi  ", Destination::direct(" bob "))
        .with_media("   ");
    let message = storage.persist(&draft, Utc::now()).await.expect("persist");

    assert_eq!(message.sender, "alice");
    assert_eq!(message.body, "hi");
    assert_eq!(message.media, None);
    assert_eq!(message.destination, Destination::direct("bob"));
    assert_eq!(message.delivered_to, vec!["alice".to_string()]);

    let seen = storage.mark_seen(message.id, "alice").await.expect("seen");
    assert!(seen.seen_by.is_empty());
    let conversation = storage
        .find_conversation("alice", "bob")
        .await
        .expect("conversation");
    assert_eq!(conversation, vec![seen]);
}
