use super::status::preview;
use super::Context;
use clipmesh::crypto::SharedCode;
use clipmesh::history::History;
use clipmesh::sync::SyncSession;
use clipmesh::transport::MemoryNetwork;
use std::sync::Arc;
use tracing::info;

/// Join a sync group and optionally share a text with it
///
/// Without `--code` the saved sync code is used. A new code is saved only
/// after the connect succeeds, together with the updated history.
///
/// The session runs on the in-process rendezvous network, so only devices
/// started in this process (see `clipmesh demo`) can be reached.
pub async fn execute(
    context: &Context,
    code: Option<String>,
    text: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = context.state.load()?;

    let code = code
        .or_else(|| state.sync_code.clone())
        .ok_or("No sync code saved. Pass --code or run `clipmesh generate-code`.")?;
    let code = SharedCode::new(&code)?;

    let history = History::from_items(
        std::mem::take(&mut state.history),
        context.config.history.max_items,
    );
    let handle = SyncSession::new(Arc::new(MemoryNetwork::new()))
        .with_backoff(context.config.reconnect.policy())
        .with_history(history)
        .spawn();

    let connected = handle.connect(code.as_str()).await?;
    info!(slot = connected.slot, "joined group");
    println!(
        "✅ Joined group {} as device {}",
        connected.group.short(),
        connected.slot
    );
    state.sync_code = Some(code.as_str().to_string());

    if let Some(text) = text {
        let sent = handle.sync(&text).await?;
        println!(
            "📋 Synced \"{}\" to {} peer(s)",
            preview(&text),
            sent.delivered
        );
    }

    state.history = handle.history().await?;
    handle.shutdown().await?;
    context.state.save(&state)?;

    Ok(())
}
