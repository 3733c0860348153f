//! `memtier init` — First-time setup.

use memtier_config::AppConfig;
use std::path::Path;

use super::config_file;

pub async fn run(explicit: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_file(explicit);

    println!("memtier — First-Time Setup");
    println!("==========================\n");

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        } else {
            println!("  Config directory exists: {}", dir.display());
        }
    }

    if config_path.exists() && !force {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());

    let config = AppConfig::load_from(&config_path)?;
    println!("\n📝 Next steps:");
    println!("   1. Adjust token limits and tier settings in config.toml");
    println!(
        "   2. Memories will be stored at {}",
        config.storage.resolved_path().display()
    );
    println!("   3. Try: memtier memory add \"The user prefers Rust\" --tier long_term");

    Ok(())
}
