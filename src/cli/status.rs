use super::Context;
use clipmesh::crypto::{derive, SharedCode};
use clipmesh::history::{History, Source};

/// Show the saved sync group and a history summary
///
/// Live connectivity (slot, peers, rendezvous state) belongs to a running
/// session; this reports what a new session would start from.
pub fn execute(context: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let state = context.state.load()?;
    let history = History::from_items(state.history, context.config.history.max_items);

    println!("📊 clipmesh status");
    println!();
    println!("State: {}", context.state.path().display());

    match state.sync_code.as_deref().map(SharedCode::new) {
        Some(Ok(code)) => {
            let (group, _) = derive(&code);
            println!("Sync code: {}", code);
            println!("Group: {}", group.short());
        }
        Some(Err(_)) | None => {
            println!("Sync code: not set");
            println!("  Run `clipmesh join --code <code>` or `clipmesh generate-code`");
        }
    }

    println!("History: {} / {} item(s)", history.len(), context.config.history.max_items);
    if let Some(latest) = history.latest() {
        println!("Latest: {} ({})", preview(&latest.text), source_label(latest.source));
    }

    Ok(())
}

pub(crate) fn source_label(source: Source) -> &'static str {
    match source {
        Source::Local => "local",
        Source::Synced => "synced",
    }
}

/// Single-line preview, truncated to 60 characters.
pub(crate) fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = text.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(MAX_CHARS).collect();
    if line.chars().count() > MAX_CHARS || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::ClipMeshConfig;
    use clipmesh::history::StateFile;
    use tempfile::TempDir;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("first\nsecond"), "first…");
        assert_eq!(preview(&"x".repeat(80)), format!("{}…", "x".repeat(60)));
        assert_eq!(preview(""), "");
    }

    #[test]
    fn test_status_without_state() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("state.json");
        let context = Context {
            config: ClipMeshConfig::new(state_path.clone()),
            state: StateFile::new(state_path),
        };
        assert!(execute(&context).is_ok());
    }
}
