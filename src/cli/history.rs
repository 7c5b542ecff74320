use super::status::{preview, source_label};
use super::{Context, HistoryAction};
use clipmesh::history::History;
use uuid::Uuid;

/// Inspect or edit the persisted clipboard history
pub fn execute(context: &Context, action: HistoryAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = context.state.load()?;
    let mut history = History::from_items(
        std::mem::take(&mut state.history),
        context.config.history.max_items,
    );

    match action {
        HistoryAction::List => {
            if history.is_empty() {
                println!("History is empty.");
            }
            for item in history.items() {
                println!(
                    "{}  {:>6}  {}",
                    item.id,
                    source_label(item.source),
                    preview(&item.text)
                );
            }
            return Ok(());
        }
        HistoryAction::Latest => {
            match history.latest() {
                Some(item) => println!("{}", item.text),
                None => println!("History is empty."),
            }
            return Ok(());
        }
        HistoryAction::Delete { id } => {
            let id = Uuid::parse_str(&id).map_err(|e| format!("Invalid item id '{}': {}", id, e))?;
            if !history.remove(id) {
                return Err(format!("No history item with id {}", id).into());
            }
            println!("Deleted {}", id);
        }
        HistoryAction::Clear => {
            history.clear();
            println!("History cleared.");
        }
    }

    state.history = history.into_items();
    context.state.save(&state)?;
    Ok(())
}
