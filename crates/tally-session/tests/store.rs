//! Concurrency tests for the session store.
//!
//! Sessions are independent: many tasks mutate many sessions at once and
//! every mutation must land exactly once.

use std::sync::Arc;

use tally_protocol::{ParticipantId, SessionId};
use tally_session::{SessionConfig, SessionStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_share_one_entry() {
    let store = Arc::new(SessionStore::default());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.create(SessionId::new("SAME")).unwrap()
        }));
    }

    let mut entries = Vec::new();
    for handle in handles {
        entries.push(handle.await.unwrap());
    }

    assert_eq!(store.len(), 1);
    assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_across_sessions_all_land() {
    let store = Arc::new(SessionStore::new(SessionConfig::default()));
    let codes: Vec<SessionId> = (0..4).map(|i| SessionId::new(format!("S{i}00"))).collect();
    for code in &codes {
        store.create(code.clone()).unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..200u64 {
        let store = Arc::clone(&store);
        let code = codes[(n % 4) as usize].clone();
        handles.push(tokio::spawn(async move {
            let pid = ParticipantId(n);
            store.bind_participant(pid, &code).unwrap();
            let entry = store.get(&code).unwrap();
            let mut slot = entry.lock().await;
            slot.session.add_participant(pid, format!("P{n}"));
            slot.session.claim_if_vacant(pid);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for code in &codes {
        let entry = store.get(code).unwrap();
        let slot = entry.lock().await;
        assert_eq!(slot.session.participant_count(), 50);
        let flagged = slot
            .session
            .participants()
            .iter()
            .filter(|p| p.is_facilitator)
            .count();
        assert_eq!(flagged, 1, "exactly one facilitator per session");
    }
}

#[tokio::test]
async fn test_removed_entry_stays_usable_by_holders() {
    let store = SessionStore::default();
    let entry = store.create(SessionId::new("GONE")).unwrap();

    store.remove(&SessionId::new("GONE"));

    let mut slot = entry.lock().await;
    slot.session.add_participant(ParticipantId(1), "Ada");
    assert_eq!(slot.session.participant_count(), 1);
    assert!(store.get(&SessionId::new("GONE")).is_none());
}
