//! `memtier prompt` — Build a budgeted prompt from stored memories.

use memtier_budget::{PromptOptions, PromptResult};
use memtier_core::strategy::SelectorKind;
use memtier_memory::{GenerateRequest, MemoryManager, SessionScope};

pub struct PromptArgs {
    pub system: String,
    pub query: String,
    pub budget: Option<usize>,
    pub max_turns: usize,
    pub include_working: bool,
    pub include_long_term: bool,
    pub selector: Option<SelectorKind>,
    pub json: bool,
}

pub async fn run(
    manager: &MemoryManager,
    scope: &SessionScope,
    args: PromptArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = GenerateRequest::new(args.system, args.query)
        .with_max_turns(args.max_turns)
        .with_tiers(args.include_working, args.include_long_term)
        .with_options(PromptOptions {
            selector: args.selector,
            ..PromptOptions::default()
        });
    if let Some(budget) = args.budget {
        request = request.with_budget(budget);
    }

    let result = manager.generate_prompt(scope, request).await?;
    print_result(&result, args.json)
}

/// Print the prompt (or the whole result as JSON) to stdout and the usage
/// summary to stderr.
pub fn print_result(result: &PromptResult, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", result.prompt);

    let usage = &result.token_usage;
    let parts: Vec<String> = usage
        .parts
        .iter()
        .map(|(name, tokens)| format!("{name}={tokens}"))
        .collect();
    eprintln!();
    eprintln!("── {} / {} tokens ({})", usage.total, usage.budget, parts.join(", "));
    if !result.removed_ids.is_empty() {
        eprintln!("   removed: {}", result.removed_ids.join(", "));
    }
    if !result.summarized_ids.is_empty() {
        eprintln!("   summarized: {}", result.summarized_ids.join(", "));
    }
    if result.budget_exceeded {
        eprintln!("   ⚠️  budget exceeded");
    }
    Ok(())
}
