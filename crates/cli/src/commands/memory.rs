//! `memtier memory` — Memory management commands.

use memtier_core::memory::{Memory, MemoryTier, Metadata};
use memtier_memory::{MemoryManager, SessionScope};

/// Parse `key=value` pairs. Values that are valid JSON keep their type
/// (`count=3` is a number); anything else is a string.
pub fn parse_meta(pairs: &[String]) -> Result<Metadata, String> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Metadata must be key=value, got {pair:?}"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Metadata key is empty in {pair:?}"));
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(80).collect();
    if content.chars().count() > 80 {
        out.push('…');
    }
    out.replace('\n', " ")
}

fn print_row(i: usize, memory: &Memory) {
    println!(
        "  {i:>2}. [{}] {} (importance {:.2}) {}",
        memory.tier.as_str(),
        memory.id,
        memory.importance,
        preview(&memory.content)
    );
}

pub async fn add(
    manager: &MemoryManager,
    scope: &SessionScope,
    tier: MemoryTier,
    content: String,
    meta: &[String],
    importance: Option<f32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let metadata = parse_meta(meta)?;
    let memory = manager
        .add_memory(scope, tier, content, metadata, importance)
        .await?;
    println!("{}", memory.id);
    Ok(())
}

pub async fn get(
    manager: &MemoryManager,
    scope: &SessionScope,
    id: &str,
    tier: Option<MemoryTier>,
) -> Result<(), Box<dyn std::error::Error>> {
    match manager.get_memory(scope, id, tier).await? {
        Some(memory) => println!("{}", serde_json::to_string_pretty(&memory)?),
        None => return Err(format!("Memory not found: {id}").into()),
    }
    Ok(())
}

pub async fn list(
    manager: &MemoryManager,
    scope: &SessionScope,
    tier: Option<MemoryTier>,
    limit: usize,
    offset: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let memories = manager.list_memories(scope, tier, limit, offset).await?;
    if memories.is_empty() {
        println!("   No memories found.");
    }
    for (i, memory) in memories.iter().enumerate() {
        print_row(offset + i + 1, memory);
    }
    Ok(())
}

pub async fn delete(
    manager: &MemoryManager,
    scope: &SessionScope,
    id: &str,
    tier: Option<MemoryTier>,
) -> Result<(), Box<dyn std::error::Error>> {
    if manager.delete_memory(scope, id, tier).await? {
        println!("🗑️  Deleted {id}");
        Ok(())
    } else {
        Err(format!("Memory not found: {id}").into())
    }
}

pub async fn search(
    manager: &MemoryManager,
    scope: &SessionScope,
    meta: &[String],
    tier: Option<MemoryTier>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = parse_meta(meta)?;
    let found = manager.search_by_metadata(scope, &filter, tier, limit).await?;
    if found.is_empty() {
        println!("   No memories found.");
    }
    for (i, memory) in found.iter().enumerate() {
        print_row(i + 1, memory);
    }
    Ok(())
}

pub async fn turn(
    manager: &MemoryManager,
    scope: &SessionScope,
    content: Option<String>,
    role: &str,
    last: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(content) = content {
        let memory = manager
            .add_conversation_turn(scope, role, content, None)
            .await?;
        println!("{}", memory.id);
        return Ok(());
    }

    let mut turns = manager.get_recent_turns(scope, last).await?;
    turns.reverse();
    for memory in &turns {
        println!(
            "{}: {}",
            memory.role().unwrap_or("unknown").to_uppercase(),
            memory.content
        );
    }
    Ok(())
}

pub async fn context(
    manager: &MemoryManager,
    scope: &SessionScope,
    key: Option<&str>,
    value: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let (Some(key), Some(value)) = (key, value) {
        let memory = manager
            .store_session_context(scope, key, value, None)
            .await?;
        println!("{}", memory.id);
        return Ok(());
    }

    let entries = manager.get_session_context(scope, key).await?;
    for (key, value) in &entries {
        println!("{key} = {value}");
    }
    Ok(())
}

pub async fn migrate(
    manager: &MemoryManager,
    scope: &SessionScope,
    id: &str,
    from: MemoryTier,
    to: MemoryTier,
) -> Result<(), Box<dyn std::error::Error>> {
    match manager.migrate_tier(scope, id, from, to).await? {
        Some(memory) => {
            println!("✅ Moved {id} to {}", memory.tier.as_str());
            Ok(())
        }
        None => Err(format!("Memory not found in {}: {id}", from.as_str()).into()),
    }
}

pub async fn progress(manager: &MemoryManager, scope: &SessionScope) -> Result<(), Box<dyn std::error::Error>> {
    if manager.progression().is_empty() {
        println!("No progression rules configured.");
        return Ok(());
    }
    let report = manager.apply_progression(scope).await?;
    if report.is_empty() {
        println!("No rule fired.");
    } else {
        println!(
            "✅ Fired {}: {} migrated, {} promoted",
            report.fired.join(", "),
            report.migrated.len(),
            report.promoted.len()
        );
    }
    Ok(())
}
