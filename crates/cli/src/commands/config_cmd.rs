//! `memtier config` — Configuration management commands.

use memtier_budget::TokenBudgetManager;
use std::path::Path;

use super::{config_file, load_config};

pub async fn validate(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match load_config(explicit) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    // Strategy names, weights and allocations are checked by the engine
    if let Err(e) = TokenBudgetManager::from_config(&config) {
        println!("   ❌ Budget settings: {e}");
        return Err(e.into());
    }

    let mut warnings = Vec::new();
    if config.application.reserved_tokens >= config.application.global_token_limit {
        warnings.push("reserved_tokens leaves no room for memories");
    }
    if config.budget.recency_weight + config.budget.importance_weight <= 0.0 {
        warnings.push("Priority weights sum to 0; every memory scores the same");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Token limit: {}", config.application.global_token_limit);
    println!("   Selector:    {}", config.budget.selector);
    println!(
        "   Adaptation:  {}",
        config
            .budget
            .adaptation_chain
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    );
    println!("   Storage:     {:?}", config.storage.backend);
    println!("   Components:  {}", config.components.len());

    Ok(())
}

pub async fn show(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(explicit)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_file(explicit).display());
    Ok(())
}
