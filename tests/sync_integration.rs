//! End-to-end tests for group sync over the in-memory rendezvous network.
//!
//! Every device runs its own session actor; they share one `MemoryNetwork`
//! that plays both rendezvous directory and link fabric:
//! - Two devices claim slots 1 and 2 and exchange an encrypted text
//! - Three devices form a full mesh
//! - An eleventh device finds the group full
//! - Connecting with a new code releases the old slot

use clipmesh::crypto::{derive, SharedCode};
use clipmesh::history::Source;
use clipmesh::sync::{slot_name, SyncError, SyncHandle, SyncSession, MAX_SLOTS};
use clipmesh::transport::MemoryNetwork;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

// === Test Fixtures ===

const CODE: &str = "happy-cat-482";
const WAIT: Duration = Duration::from_secs(5);

fn device(network: &MemoryNetwork) -> SyncHandle {
    SyncSession::new(Arc::new(network.clone())).spawn()
}

async fn wait_for_peers(handle: &SyncHandle, expected: usize) {
    timeout(WAIT, async {
        loop {
            if handle.status().await.unwrap().peers.len() >= expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("mesh did not form in time");
}

// === Tests ===

#[tokio::test]
async fn test_two_devices_sync_text() {
    let network = MemoryNetwork::new();
    let a = device(&network);
    let b = device(&network);

    let info_a = a.connect(CODE).await.unwrap();
    let info_b = b.connect(CODE).await.unwrap();
    assert_eq!(info_a.slot, 1);
    assert_eq!(info_b.slot, 2);
    assert_eq!(info_a.group, info_b.group);

    wait_for_peers(&a, 1).await;
    wait_for_peers(&b, 1).await;

    let mut incoming = b.subscribe();
    let sent = a.sync("copied text").await.unwrap();
    assert_eq!(sent.delivered, 1);

    let received = timeout(WAIT, incoming.recv()).await.unwrap().unwrap();
    assert_eq!(received.text, "copied text");
    assert_eq!(received.id, sent.id);
    assert_eq!(received.timestamp, sent.timestamp);
    assert_eq!(received.from, slot_name(&info_a.group, 1));
    assert!(received.inserted);

    let history = b.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "copied text");
    assert_eq!(history[0].source, Source::Synced);
}

#[tokio::test]
async fn test_echo_keeps_local_provenance() {
    let network = MemoryNetwork::new();
    let a = device(&network);
    let b = device(&network);
    a.connect(CODE).await.unwrap();
    b.connect(CODE).await.unwrap();
    wait_for_peers(&a, 1).await;
    wait_for_peers(&b, 1).await;

    let mut at_a = a.subscribe();
    a.sync("same text").await.unwrap();
    b.sync("same text").await.unwrap();

    let echoed = timeout(WAIT, at_a.recv()).await.unwrap().unwrap();
    assert!(!echoed.inserted);

    let history = a.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source, Source::Local);
}

#[tokio::test]
async fn test_three_devices_form_full_mesh() {
    let network = MemoryNetwork::new();
    let devices: Vec<SyncHandle> = (0..3).map(|_| device(&network)).collect();
    for (i, d) in devices.iter().enumerate() {
        assert_eq!(d.connect(CODE).await.unwrap().slot as usize, i + 1);
    }
    for d in &devices {
        wait_for_peers(d, 2).await;
    }

    let mut receivers: Vec<_> = devices[1..].iter().map(|d| d.incoming()).collect();
    let sent = devices[0].sync("to everyone").await.unwrap();
    assert_eq!(sent.delivered, 2);

    use futures::StreamExt;
    for receiver in receivers.iter_mut() {
        let item = timeout(WAIT, receiver.next()).await.unwrap().unwrap();
        assert_eq!(item.text, "to everyone");
    }
}

#[tokio::test]
async fn test_eleventh_device_finds_group_full() {
    let network = MemoryNetwork::new();
    let mut devices = Vec::new();
    for slot in 1..=MAX_SLOTS {
        let d = device(&network);
        assert_eq!(d.connect(CODE).await.unwrap().slot, slot);
        devices.push(d);
    }

    let late = device(&network);
    assert_eq!(
        late.connect(CODE).await.unwrap_err(),
        SyncError::GroupFull { max_slots: 10 }
    );
    assert!(!late.is_connected().await);
}

#[tokio::test]
async fn test_freed_slot_is_reused() {
    let network = MemoryNetwork::new();
    let a = device(&network);
    let b = device(&network);
    a.connect(CODE).await.unwrap();
    assert_eq!(b.connect(CODE).await.unwrap().slot, 2);

    a.disconnect().await.unwrap();
    let c = device(&network);
    assert_eq!(c.connect(CODE).await.unwrap().slot, 1);
}

#[tokio::test]
async fn test_new_code_replaces_old_group() {
    let network = MemoryNetwork::new();
    let a = device(&network);
    let b = device(&network);

    let old = a.connect(CODE).await.unwrap();
    b.connect(CODE).await.unwrap();
    wait_for_peers(&b, 1).await;

    let new = a.connect("calm-wolf-123").await.unwrap();
    assert_ne!(new.group, old.group);
    assert_eq!(new.slot, 1);
    assert!(!network.is_registered(&old.name));
    assert!(network.is_registered(&new.name));

    let status = a.status().await.unwrap();
    assert_eq!(status.group, Some(new.group));
    assert!(status.peers.is_empty());

    // b loses its peer once the old links close
    timeout(WAIT, async {
        while !b.status().await.unwrap().peers.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_superseded_connect_leaves_one_registration() {
    let network = MemoryNetwork::new();
    let a = device(&network);

    let (first, second) = tokio::join!(a.connect(CODE), a.connect("calm-wolf-123"));
    assert!(matches!(first, Ok(_) | Err(SyncError::Cancelled)));
    let second = second.unwrap();

    let (old_group, _) = derive(&SharedCode::new(CODE).unwrap());
    // Either never claimed or released by the newer connect
    timeout(WAIT, async {
        while network.is_registered(&slot_name(&old_group, 1)) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(network.is_registered(&second.name));
    assert_eq!(a.status().await.unwrap().group, Some(second.group));
}

#[tokio::test]
async fn test_foreign_group_cannot_read_texts() {
    let network = MemoryNetwork::new();
    let a = device(&network);
    let b = device(&network);
    let outsider = device(&network);

    a.connect(CODE).await.unwrap();
    b.connect(CODE).await.unwrap();
    let other = outsider.connect("calm-wolf-123").await.unwrap();
    assert_eq!(other.slot, 1, "different codes use disjoint slot names");

    wait_for_peers(&a, 1).await;
    let sent = a.sync("private").await.unwrap();
    assert_eq!(sent.delivered, 1);

    sleep(Duration::from_millis(50)).await;
    assert!(outsider.history().await.unwrap().is_empty());
    assert!(outsider.status().await.unwrap().peers.is_empty());
}
