//! `memtier assemble` — Run the budget engine on a JSON request.

use memtier_budget::{PromptRequest, PromptResult, TokenBudgetManager};
use memtier_config::AppConfig;
use std::io::Read;
use std::path::Path;

use super::load_config;
use super::prompt::print_result;

/// Parse a JSON request and build its prompt with `config`'s settings.
pub fn assemble_json(config: &AppConfig, json: &str) -> Result<PromptResult, Box<dyn std::error::Error>> {
    let request: PromptRequest =
        serde_json::from_str(json).map_err(|e| format!("Invalid request JSON: {e}"))?;
    let manager = TokenBudgetManager::from_config(config)?;
    Ok(manager.construct_prompt(&request)?)
}

pub async fn run(
    explicit: Option<&Path>,
    input: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(explicit)?;

    let raw = match input {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let result = assemble_json(&config, &raw)?;
    print_result(&result, json)
}
