//! End-to-end integration tests for memtier.
//!
//! These tests exercise the full pipeline from a config file through the
//! memory manager and store to the assembled prompt, and the JSON request
//! path used by `memtier assemble`.

use chrono::{TimeZone, Utc};
use memtier_budget::{PromptRequest, PromptResult, TokenBudgetManager};
use memtier_config::{AppConfig, StorageBackend};
use memtier_core::memory::{Memory, MemoryTier, Metadata};
use memtier_core::strategy::AdaptationKind;
use memtier_memory::{GenerateRequest, MemoryManager, SessionScope};

// ── Helpers ──────────────────────────────────────────────────────────────

fn write_config(dir: &std::path::Path, body: &str) -> AppConfig {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    AppConfig::load_from(&path).unwrap()
}

fn file_config(dir: &std::path::Path) -> AppConfig {
    let store = dir.join("memories.jsonl");
    write_config(
        dir,
        &format!(
            r#"
[application]
global_token_limit = 2000

[estimator]
memory_overhead = 0

[storage]
backend = "file"
path = "{}"
framework = "e2e"
"#,
            store.display().to_string().replace('\\', "\\\\")
        ),
    )
}

/// A memory whose content costs exactly `tokens` at 4 chars per token.
fn sized(id: &str, tier: MemoryTier, tokens: usize, importance: f32) -> Memory {
    Memory::new("a".repeat(tokens * 4), tier)
        .with_id(id)
        .with_importance(importance)
        .at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
}

fn engine() -> TokenBudgetManager {
    let mut config = AppConfig::default();
    config.estimator.memory_overhead = 0;
    TokenBudgetManager::from_config(&config).unwrap()
}

fn construct(request: PromptRequest) -> PromptResult {
    engine().construct_prompt(&request).unwrap()
}

// ── Store-backed pipeline ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_conversation_persists_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let scope = SessionScope::new("chat-1");

    {
        let manager = MemoryManager::from_config(&config).unwrap();
        manager
            .add_conversation_turn(&scope, "user", "My name is Ada.", None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        manager
            .add_conversation_turn(&scope, "assistant", "Nice to meet you, Ada.", None)
            .await
            .unwrap();
        manager
            .store_session_context(&scope, "user_name", "Ada", None)
            .await
            .unwrap();
        manager
            .add_memory(
                &scope,
                MemoryTier::LongTerm,
                "Ada prefers concise answers.",
                Metadata::new(),
                Some(0.9),
            )
            .await
            .unwrap();
    }

    // A fresh manager reads everything back from the JSONL file
    let manager = MemoryManager::from_config(&config).unwrap();
    assert_eq!(manager.store().name(), "file");
    assert_eq!(manager.store().count().await.unwrap(), 4);

    let result = manager
        .generate_prompt(&scope, GenerateRequest::new("You are helpful.", "What is my name?"))
        .await
        .unwrap();

    assert!(!result.budget_exceeded);
    assert!(result.prompt.starts_with("You are helpful."));
    assert!(result.prompt.ends_with("USER: What is my name?"));
    assert!(result.prompt.contains("--- SHORT_TERM MEMORIES ---"));
    assert!(result.prompt.contains("--- WORKING MEMORIES ---"));
    assert!(result.prompt.contains("--- LONG_TERM MEMORIES ---"));

    let turn = result.prompt.find("My name is Ada.").unwrap();
    let reply = result.prompt.find("Nice to meet you").unwrap();
    assert!(turn < reply, "turns appear in chronological order");

    let st = result.prompt.find("SHORT_TERM").unwrap();
    let lt = result.prompt.find("LONG_TERM").unwrap();
    assert!(st < lt, "default section order");
    assert!(result.token_usage.total <= 2000);
}

#[tokio::test]
async fn e2e_sessions_do_not_leak() {
    let dir = tempfile::tempdir().unwrap();
    let manager = MemoryManager::from_config(&file_config(dir.path())).unwrap();

    let alice = SessionScope::new("alice");
    let bob = SessionScope::new("bob");
    manager
        .add_conversation_turn(&alice, "user", "alice secret", None)
        .await
        .unwrap();

    let result = manager
        .generate_prompt(&bob, GenerateRequest::new("sys", "hello"))
        .await
        .unwrap();
    assert!(!result.prompt.contains("alice secret"));
    assert_eq!(result.prompt, "sys\n\nUSER: hello");
}

#[tokio::test]
async fn e2e_migration_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    let scope = SessionScope::default();

    let id = {
        let manager = MemoryManager::from_config(&config).unwrap();
        let memory = manager
            .add_memory(&scope, MemoryTier::ShortTerm, "promote me", Metadata::new(), None)
            .await
            .unwrap();
        manager
            .migrate_tier(&scope, &memory.id, MemoryTier::ShortTerm, MemoryTier::LongTerm)
            .await
            .unwrap()
            .unwrap();
        memory.id
    };

    let manager = MemoryManager::from_config(&config).unwrap();
    let found = manager.get_memory(&scope, &id, None).await.unwrap().unwrap();
    assert_eq!(found.tier, MemoryTier::LongTerm);
    assert_eq!(found.ttl, None);
}

#[tokio::test]
async fn e2e_component_token_limit_caps_generated_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("memories.jsonl");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[estimator]
memory_overhead = 0

[storage]
path = "{}"

[[components]]
id = "planner"
token_limit = 20
"#,
            store.display().to_string().replace('\\', "\\\\")
        ),
    );
    let manager = MemoryManager::from_config(&config).unwrap();
    let planner = SessionScope::new("s").with_component("planner");

    manager
        .add_memory(&planner, MemoryTier::Working, "x".repeat(400), Metadata::new(), None)
        .await
        .unwrap();

    let result = manager
        .generate_prompt(&planner, GenerateRequest::new("sys", "q").with_budget(5000))
        .await
        .unwrap();
    assert_eq!(result.token_usage.budget, 20);
    assert!(!result.prompt.contains("xxxx"));
    assert!(result.budget_exceeded, "eligible memory could not be included");
}

#[tokio::test]
async fn e2e_progression_rules_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("memories.jsonl");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[storage]
path = "{}"

[[progression]]
name = "archive_turns"
trigger = {{ type = "count", tier = "short_term", memory_type = "conversation_turn", threshold = 3 }}
action = {{ type = "migrate", target_tier = "long_term", keep_newest = 1 }}
"#,
            store.display().to_string().replace('\\', "\\\\")
        ),
    );
    assert_eq!(config.progression.len(), 1);
    let scope = SessionScope::new("chat");

    {
        let manager = MemoryManager::from_config(&config).unwrap();
        for text in ["first", "second", "third"] {
            manager
                .add_conversation_turn(&scope, "user", text, None)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }

    let manager = MemoryManager::from_config(&config).unwrap();
    let turns = manager.get_recent_turns(&scope, 10).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].content, "third");

    let archived = manager
        .list_memories(&scope, Some(MemoryTier::LongTerm), 10, 0)
        .await
        .unwrap();
    let mut contents: Vec<&str> = archived.iter().map(|m| m.content.as_str()).collect();
    contents.sort_unstable();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn e2e_memory_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[storage]\nbackend = \"memory\"\n");
    assert_eq!(config.storage.backend, StorageBackend::Memory);

    let manager = MemoryManager::from_config(&config).unwrap();
    assert_eq!(manager.store().name(), "in_memory");
    assert!(!dir.path().join("memories.jsonl").exists());
}

// ── JSON request path (`memtier assemble`) ───────────────────────────────

#[test]
fn e2e_json_request_roundtrip() {
    let request = PromptRequest::new("System.", "Question?", 1000)
        .with_candidates(MemoryTier::ShortTerm, vec![sized("st1", MemoryTier::ShortTerm, 10, 0.5)])
        .with_candidates(MemoryTier::LongTerm, vec![sized("lt1", MemoryTier::LongTerm, 10, 0.5)]);
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"short_term\""));

    let parsed: PromptRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, request);

    let result = construct(parsed);
    let out = serde_json::to_value(&result).unwrap();
    assert_eq!(out["budget_exceeded"], serde_json::json!(false));
    assert!(out["token_usage"]["parts"]["short_term"].as_u64().unwrap() > 0);
    assert!(out["token_usage"]["parts"]["long_term"].as_u64().unwrap() > 0);
}

#[test]
fn e2e_scenario_a_oversized_tier_excluded() {
    let request = PromptRequest::new("", "", 1000)
        .with_candidates(MemoryTier::ShortTerm, vec![sized("st", MemoryTier::ShortTerm, 50, 0.5)])
        .with_candidates(MemoryTier::Working, vec![sized("big", MemoryTier::Working, 2000, 0.5)]);
    let result = construct(request);
    assert!(!result.budget_exceeded);
    assert!(result.token_usage.tier(MemoryTier::ShortTerm) >= 50);
    assert_eq!(result.token_usage.tier(MemoryTier::Working), 0);
    assert!(!result.prompt.contains("WORKING"));
}

#[test]
fn e2e_scenario_c_nothing_fits() {
    let request = PromptRequest::new("", "", 100)
        .with_candidates(MemoryTier::Working, vec![sized("huge", MemoryTier::Working, 500, 0.5)]);
    let result = construct(request);
    assert!(result.budget_exceeded);
    assert!(!result.prompt.contains("aaaa"));
}

#[test]
fn e2e_chain_from_json_options() {
    // Tier budgets admit everything; the total then exceeds the memory budget
    let json = serde_json::json!({
        "system_message": "",
        "user_query": "",
        "total_budget": 160,
        "candidates": {
            "working": [sized("w1", MemoryTier::Working, 40, 0.9), sized("w2", MemoryTier::Working, 40, 0.9)],
            "long_term": [
                sized("l1", MemoryTier::LongTerm, 30, 0.1),
                sized("l2", MemoryTier::LongTerm, 30, 0.1),
                sized("l3", MemoryTier::LongTerm, 30, 0.1)
            ]
        },
        "options": {
            "adaptation_chain": ["prioritize_tier"],
            "tier_budgets": { "working": 82, "long_term": 93 }
        }
    });
    let request: PromptRequest = serde_json::from_value(json).unwrap();
    assert_eq!(
        request.options.adaptation_chain,
        Some(vec![AdaptationKind::PrioritizeTier])
    );

    // Each item costs its content plus one token of "- " framing. Dropping
    // all of long-term would overshoot, so it is only reduced: one memory
    // (the latest of three equals) is enough.
    let result = construct(request);
    assert_eq!(result.removed_ids, vec!["l3".to_string()]);
    assert!(!result.budget_exceeded);
    assert!(result.prompt.contains("LONG_TERM"));
    assert_eq!(result.token_usage.tier(MemoryTier::Working), 8 + 80);
    assert!(result.token_usage.total <= 160);
}

#[test]
fn e2e_invalid_option_fails_fast() {
    let json = r#"{
        "system_message": "s",
        "user_query": "q",
        "total_budget": 100,
        "options": { "relevance_threshold": 1.5, "selector": "relevance" }
    }"#;
    let request: PromptRequest = serde_json::from_str(json).unwrap();
    assert!(engine().construct_prompt(&request).is_err());
}

#[test]
fn e2e_unknown_strategy_rejected_at_parse() {
    let json = r#"{
        "system_message": "s",
        "user_query": "q",
        "total_budget": 100,
        "options": { "adaptation_chain": ["shrink"] }
    }"#;
    assert!(serde_json::from_str::<PromptRequest>(json).is_err());
}
