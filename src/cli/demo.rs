use super::status::preview;
use super::Context;
use clipmesh::crypto::SharedCode;
use clipmesh::sync::{generate_code, SyncHandle, SyncSession};
use clipmesh::transport::MemoryNetwork;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const MESH_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run several in-process devices and sync a text between them
///
/// Devices beyond the slot limit fail to join and are reported as such.
pub async fn execute(
    context: &Context,
    devices: usize,
    text: String,
    code: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if devices < 2 {
        return Err("A demo needs at least 2 devices".into());
    }

    let code = match code {
        Some(code) => SharedCode::new(&code)?,
        None => generate_code(),
    };
    println!("🔑 Sync code: {}", code);

    let network = MemoryNetwork::new();
    let mut joined: Vec<(u8, SyncHandle)> = Vec::new();
    for device in 1..=devices {
        let handle = SyncSession::new(Arc::new(network.clone()))
            .with_backoff(context.config.reconnect.policy())
            .spawn();
        match handle.connect(code.as_str()).await {
            Ok(info) => {
                println!(
                    "  device {} joined group {} in slot {}",
                    device,
                    info.group.short(),
                    info.slot
                );
                joined.push((info.slot, handle));
            }
            Err(e) => println!("  device {} could not join: {}", device, e),
        }
    }

    if joined.len() < 2 {
        return Err("Fewer than 2 devices joined".into());
    }

    let expected_peers = joined.len() - 1;
    for (slot, handle) in &joined {
        if !wait_for_peers(handle, expected_peers).await {
            println!("  ⚠️  slot {} sees fewer than {} peers", slot, expected_peers);
        }
    }

    let mut receivers: Vec<_> = joined[1..]
        .iter()
        .map(|(slot, handle)| (*slot, handle.subscribe()))
        .collect();

    let (sender_slot, sender) = &joined[0];
    let sent = sender.sync(&text).await?;
    println!();
    println!(
        "📋 slot {} synced \"{}\" to {} peer(s)",
        sender_slot,
        preview(&text),
        sent.delivered
    );

    for (slot, receiver) in receivers.iter_mut() {
        match timeout(RECEIVE_TIMEOUT, receiver.recv()).await {
            Ok(Ok(incoming)) => println!(
                "  slot {} received \"{}\" from {}",
                slot,
                preview(&incoming.text),
                incoming.from
            ),
            _ => println!("  slot {} received nothing", slot),
        }
    }

    for (_, handle) in &joined {
        handle.shutdown().await?;
    }
    Ok(())
}

async fn wait_for_peers(handle: &SyncHandle, expected: usize) -> bool {
    timeout(MESH_TIMEOUT, async {
        loop {
            match handle.status().await {
                Ok(status) if status.peers.len() >= expected => return true,
                Ok(_) => sleep(POLL_INTERVAL).await,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}
