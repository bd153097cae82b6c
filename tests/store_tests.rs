// Integration tests for the session store actor
//
// Actions are dispatched through cloned handles from several tasks; the
// single consumer must apply them in arrival order.

mod common;

use anyhow::Result;
use common::wait_for_state;
use interviewflow::store::{
    Action, FeedbackCategory, InterviewType, Origin, PlanTier, SessionStatus, StoreHandle,
};

#[tokio::test]
async fn test_start_yields_fresh_session() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();

    store.append_message(Origin::Remote, "left over", None);
    store.start(InterviewType::Technical, PlanTier::Free, "s1", "wss://x");
    store.flush().await;

    let state = store.snapshot();
    let session = state.session.as_ref().expect("session");
    assert_eq!(session.id, "s1");
    assert_eq!(session.status, SessionStatus::Setup);
    assert_eq!(session.endpoint, "wss://x");
    assert!(session.end_time.is_none());
    assert!(state.messages.is_empty());
    assert!(state.feedback.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_appends_keep_call_order() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();
    store.start(InterviewType::General, PlanTier::Premium, "s1", "wss://x");

    store.append_message(Origin::Remote, "Hello", None);
    store.append_message(Origin::Local, "Hi", None);
    store.append_feedback("m1", FeedbackCategory::Detailed, "Good opener", Some(80.0), None);
    store.append_feedback("m2", FeedbackCategory::Detailed, "Be specific", None, None);
    store.flush().await;

    let state = store.snapshot();
    let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Hello", "Hi"]);
    assert_eq!(state.messages[0].origin, Origin::Remote);
    assert_eq!(state.messages[1].origin, Origin::Local);
    assert_ne!(state.messages[0].id, state.messages[1].id);

    let feedback: Vec<&str> = state.feedback.iter().map(|f| f.message_id.as_str()).collect();
    assert_eq!(feedback, vec!["m1", "m2"]);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_producers_keep_their_own_order() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();
    store.start(InterviewType::General, PlanTier::Free, "s1", "wss://x");

    let mut producers = Vec::new();
    for producer in 0..4 {
        let store = store.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..50 {
                store.append_message(Origin::Remote, format!("{}:{}", producer, i), None);
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await?;
    }
    store.flush().await;

    let state = store.snapshot();
    assert_eq!(state.messages.len(), 200);
    for producer in 0..4 {
        let prefix = format!("{}:", producer);
        let seen: Vec<u32> = state
            .messages
            .iter()
            .filter_map(|m| m.content.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(seen, (0..50).collect::<Vec<u32>>());
    }
    Ok(())
}

#[tokio::test]
async fn test_end_twice_keeps_first_end_time() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();
    store.start(InterviewType::Behavioral, PlanTier::Free, "s1", "wss://x");
    store.set_capturing(true);
    store.end();

    let first = wait_for_state(&store, |s| s.is_completed()).await?;
    let end_time = first.session.as_ref().and_then(|s| s.end_time);
    assert!(end_time.is_some());
    assert!(!first.connectivity.capturing);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.end();
    store.flush().await;

    let second = store.snapshot();
    assert_eq!(second.session.as_ref().and_then(|s| s.end_time), end_time);
    assert_eq!(second, first);
    Ok(())
}

#[tokio::test]
async fn test_actions_without_session_are_noops() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();
    let mut changes = store.subscribe();

    store.end();
    store.dispatch(Action::Activate);
    store.append_message(Origin::Local, "orphan", None);
    store.flush().await;

    assert!(!changes.has_changed()?);
    assert!(store.snapshot().session.is_none());
    assert!(store.snapshot().messages.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reset_clears_everything() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();
    store.start(InterviewType::General, PlanTier::Free, "s1", "wss://x");
    store.append_message(Origin::Remote, "Hello", None);
    store.set_error(Some("boom".to_string()));
    store.set_connected(true);
    store.reset();
    store.flush().await;

    assert_eq!(store.snapshot(), Default::default());
    Ok(())
}

#[tokio::test]
async fn test_flags_are_independent_of_session() -> Result<()> {
    let (store, _task) = StoreHandle::spawn();

    store.set_error(Some("The interview service is unreachable.".to_string()));
    store.set_connected(true);
    store.flush().await;

    let state = store.snapshot();
    assert!(state.connectivity.connected);
    assert_eq!(
        state.connectivity.last_error.as_deref(),
        Some("The interview service is unreachable.")
    );

    store.set_error(None);
    store.flush().await;
    assert!(store.snapshot().connectivity.last_error.is_none());
    Ok(())
}
