//! End-to-end behavior of the synchronized view against a scripted backend.

mod common;

use common::{bookmark, eventually, settle, Call, ScriptedBackend};
use linkshelf::{
    Backend, BookmarkId, Identity, Phase, RawChange, SignIn, SyncError, SyncViewModel,
};
use serde_json::json;
use std::sync::Arc;

fn view_model(backend: &Arc<ScriptedBackend>) -> SyncViewModel {
    SyncViewModel::from_backend(backend.clone())
}

#[tokio::test]
async fn insert_after_bulk_read_goes_to_the_front() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    let vm = view_model(&backend);
    vm.start().await.unwrap();
    assert_eq!(vm.view().snapshot.ids(), vec!["a"]);

    backend.push_insert(&bookmark("ada", "b", 2));
    let view = settle(&vm, |v| v.snapshot.len() == 2).await;
    assert_eq!(view.snapshot.ids(), vec!["b", "a"]);
}

#[tokio::test]
async fn subscription_follows_the_bulk_read() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let calls = backend.calls();
    assert_eq!(
        calls,
        vec![Call::List("ada".into()), Call::Subscribe("ada".into())]
    );
    let view = vm.view();
    assert_eq!(view.phase, Phase::Ready);
    assert!(view.snapshot.is_empty());
}

#[tokio::test]
async fn duplicate_insert_delivery_is_absorbed() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    // Row already in the bulk result, then delivered twice more.
    backend.push_insert(&bookmark("ada", "a", 1));
    backend.push_insert(&bookmark("ada", "b", 2));
    backend.push_insert(&bookmark("ada", "b", 2));
    backend.push_insert(&bookmark("ada", "c", 3));

    let view = settle(&vm, |v| v.snapshot.contains(&"c".into())).await;
    assert_eq!(view.snapshot.ids(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn update_and_delete_for_unknown_ids_change_nothing() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    let vm = view_model(&backend);
    vm.start().await.unwrap();
    let before = vm.view().snapshot;

    backend.push_update(&bookmark("ada", "ghost", 5));
    backend.push_delete("ada", "ghost");
    // A marker event, so we know the two above have been processed.
    backend.push_insert(&bookmark("ada", "marker", 9));

    let view = settle(&vm, |v| v.snapshot.contains(&"marker".into())).await;
    assert_eq!(view.snapshot.ids(), vec!["marker", "a"]);
    assert_eq!(view.snapshot.get(&"a".into()), before.get(&"a".into()));
}

#[tokio::test]
async fn update_replaces_in_place() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "b", 2), bookmark("ada", "a", 1)]);
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let mut renamed = bookmark("ada", "a", 1);
    renamed.title = "Renamed elsewhere".to_string();
    backend.push_update(&renamed);

    let view = settle(&vm, |v| {
        v.snapshot.get(&"a".into()).map(|b| b.title.as_str()) == Some("Renamed elsewhere")
    })
    .await;
    assert_eq!(view.snapshot.ids(), vec!["b", "a"]);
}

#[tokio::test]
async fn malformed_payloads_never_reach_the_view() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    backend.push("ada", RawChange(json!({ "eventType": "INSERT", "new": { "id": "x" } })));
    backend.push("ada", RawChange(json!({ "eventType": "DELETE", "old": {} })));
    backend.push("ada", RawChange(json!({ "eventType": "TRUNCATE" })));
    backend.push_insert(&bookmark("ada", "ok", 3));

    let view = settle(&vm, |v| !v.snapshot.is_empty()).await;
    assert_eq!(view.snapshot.ids(), vec!["ok"]);
}

#[tokio::test]
async fn add_rejects_bad_url_without_calling_backend() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let err = vm.add("not a url", None).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(backend.inserts().is_empty());
}

#[tokio::test]
async fn add_while_signed_out_is_unauthenticated() {
    let backend = Arc::new(ScriptedBackend::new());
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    assert_eq!(
        vm.add("https://example.com", None).await,
        Err(SyncError::Unauthenticated)
    );
    assert!(backend.inserts().is_empty());
    assert_eq!(backend.active_subscriptions(), 0);
}

#[tokio::test]
async fn add_defaults_title_to_host_and_leaves_view_alone() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    vm.add(" https://example.com ", None).await.unwrap();
    vm.add("https://example.com/docs", Some("  Docs  ")).await.unwrap();

    let inserts = backend.inserts();
    assert_eq!(inserts.len(), 2);
    assert_eq!(inserts[0].title, "example.com");
    assert_eq!(inserts[0].url, "https://example.com");
    assert_eq!(inserts[0].owner.as_str(), "ada");
    assert_eq!(inserts[1].title, "Docs");

    // Nothing shows until the feed says so.
    assert!(vm.view().snapshot.is_empty());
}

#[tokio::test]
async fn insert_failure_surfaces_provider_message() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    backend.fail_inserts_with("duplicate key value violates unique constraint");
    let vm = view_model(&backend);
    vm.start().await.unwrap();
    let before = vm.view().snapshot;

    let err = vm.add("https://example.com", None).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Backend("duplicate key value violates unique constraint".to_string())
    );
    assert_eq!(vm.view().snapshot, before);
}

#[tokio::test]
async fn remove_flags_entry_until_delete_event() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let id = BookmarkId::from("a");
    vm.remove(&id).await.unwrap();
    assert_eq!(backend.deletes(), vec![id.clone()]);

    let view = vm.view();
    assert!(view.snapshot.contains(&id));
    assert!(view.is_deleting(&id));

    // A second request while the first is pending does not call again.
    vm.remove(&id).await.unwrap();
    assert_eq!(backend.deletes().len(), 1);

    backend.push_delete("ada", "a");
    let view = settle(&vm, |v| !v.snapshot.contains(&"a".into())).await;
    assert!(!view.is_deleting(&id));
    assert!(view.deleting.is_empty());
}

#[tokio::test]
async fn failed_remove_restores_entry() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    backend.fail_deletes_with("permission denied for table bookmarks");
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let id = BookmarkId::from("a");
    let err = vm.remove(&id).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Backend("permission denied for table bookmarks".to_string())
    );

    let view = vm.view();
    assert!(view.snapshot.contains(&id));
    assert!(!view.is_deleting(&id));
}

#[tokio::test]
async fn remove_requires_entry_in_view() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let err = vm.remove(&BookmarkId::from("missing")).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(backend.deletes().is_empty());
}

#[tokio::test]
async fn identity_change_releases_old_subscription() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1), bookmark("bob", "b", 2)]);
    let vm = Arc::new(view_model(&backend));
    vm.start().await.unwrap();
    assert_eq!(vm.view().snapshot.ids(), vec!["a"]);

    let changes = backend.identity_changes();
    let follower = {
        let vm = Arc::clone(&vm);
        tokio::spawn(async move { vm.follow(changes).await })
    };

    backend
        .sign_in(SignIn::new("bob"))
        .await
        .unwrap();
    let view = settle(&vm, |v| {
        v.live && v.identity.as_ref().map(|i| i.id.as_str()) == Some("bob")
    })
    .await;
    assert_eq!(view.snapshot.ids(), vec!["b"]);
    assert_eq!(backend.active_subscriptions(), 1);

    let unsubscribes = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Unsubscribe(_)))
        .count();
    assert_eq!(unsubscribes, 1);

    // Events for the previous owner no longer reach this view.
    backend.push_insert(&bookmark("ada", "late", 7));
    backend.push_insert(&bookmark("bob", "fresh", 8));
    let view = settle(&vm, |v| v.snapshot.contains(&"fresh".into())).await;
    assert_eq!(view.snapshot.ids(), vec!["fresh", "b"]);

    follower.abort();
}

#[tokio::test]
async fn stale_bulk_result_is_discarded() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1), bookmark("bob", "b", 2)]);
    let vm = Arc::new(view_model(&backend));

    let gate = backend.hold_next_list();
    let slow_open = {
        let vm = Arc::clone(&vm);
        tokio::spawn(async move { vm.open(Some(Identity::new("ada"))).await })
    };
    {
        let backend = backend.clone();
        eventually(move || backend.calls().contains(&Call::List("ada".into()))).await;
    }

    vm.open(Some(Identity::new("bob"))).await.unwrap();
    gate.notify_one();
    slow_open.await.unwrap().unwrap();

    let view = vm.view();
    assert_eq!(view.identity.unwrap().id.as_str(), "bob");
    assert_eq!(view.snapshot.ids(), vec!["b"]);
    assert_eq!(backend.active_subscriptions(), 1);
    assert!(!backend.calls().contains(&Call::Subscribe("ada".into())));
}

#[tokio::test]
async fn close_releases_the_subscription_once() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    let vm = view_model(&backend);
    vm.start().await.unwrap();
    vm.close();
    drop(vm);

    let unsubscribes = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Unsubscribe(_)))
        .count();
    assert_eq!(unsubscribes, 1);
    assert_eq!(backend.active_subscriptions(), 0);
}

#[tokio::test]
async fn failed_bulk_read_still_opens_the_feed() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    backend.fail_lists_with("list down");
    let vm = view_model(&backend);
    vm.start().await.unwrap();

    let view = vm.view();
    assert_eq!(view.phase, Phase::Ready);
    assert!(view.live);
    assert!(view.snapshot.is_empty());
    assert_eq!(view.load_error.as_deref(), Some("list down"));
    assert_eq!(backend.active_subscriptions(), 1);

    backend.push_insert(&bookmark("ada", "b", 2));
    let view = settle(&vm, |v| v.snapshot.len() == 1).await;
    assert_eq!(view.snapshot.ids(), vec!["b"]);
}

#[tokio::test]
async fn failed_subscribe_is_returned_without_a_session() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    backend.fail_next_subscribe_with("feed down");
    let vm = view_model(&backend);

    let result = vm.start().await;
    assert_eq!(result, Err(SyncError::Backend("feed down".into())));
    let view = vm.view();
    assert_eq!(view.phase, Phase::Ready);
    assert!(!view.live);
    assert!(!vm.has_session());
    assert_eq!(view.snapshot.ids(), vec!["a"]);
    assert_eq!(view.load_error.as_deref(), Some("feed down"));
    assert_eq!(backend.active_subscriptions(), 0);
}

#[tokio::test]
async fn both_initial_failures_are_reported() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.fail_lists_with("list down");
    backend.fail_next_subscribe_with("feed down");
    let vm = view_model(&backend);

    assert!(vm.start().await.is_err());
    assert_eq!(vm.view().load_error.as_deref(), Some("list down; feed down"));
}

#[tokio::test]
async fn same_user_sign_in_reopens_a_dead_feed() {
    let backend = Arc::new(ScriptedBackend::signed_in("ada"));
    backend.seed(vec![bookmark("ada", "a", 1)]);
    backend.fail_next_subscribe_with("feed down");
    let vm = Arc::new(view_model(&backend));
    assert!(vm.start().await.is_err());
    assert!(!vm.view().live);

    let changes = backend.identity_changes();
    let follower = {
        let vm = Arc::clone(&vm);
        tokio::spawn(async move { vm.follow(changes).await })
    };

    backend.sign_in(SignIn::new("ada")).await.unwrap();
    let view = settle(&vm, |v| v.live).await;
    assert!(vm.has_session());
    assert_eq!(view.snapshot.ids(), vec!["a"]);
    assert_eq!(view.load_error, None);
    assert_eq!(backend.active_subscriptions(), 1);

    backend.push_insert(&bookmark("ada", "b", 2));
    let view = settle(&vm, |v| v.snapshot.len() == 2).await;
    assert_eq!(view.snapshot.ids(), vec!["b", "a"]);

    follower.abort();
}
