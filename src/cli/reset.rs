use super::Context;
use std::io::{self, Write};

/// Forget the sync code and all history
pub fn execute(context: &Context, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let state = context.state.load()?;
    if state.sync_code.is_none() && state.history.is_empty() {
        println!("Nothing to reset.");
        return Ok(());
    }

    println!(
        "This removes the saved sync code and {} history item(s) from {}.",
        state.history.len(),
        context.state.path().display()
    );

    if !yes && !confirm_action("Type 'RESET' to confirm: ", "RESET")? {
        println!("Aborted.");
        return Ok(());
    }

    context.state.reset()?;
    println!("✅ Sync code and history cleared.");
    Ok(())
}

fn parse_confirmation(input: &str, expected: &str) -> bool {
    input.trim() == expected
}

fn confirm_action(prompt: &str, expected: &str) -> Result<bool, Box<dyn std::error::Error>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(parse_confirmation(&input, expected))
}
