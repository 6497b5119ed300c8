//! `opencodex doctor`: Diagnose system health.

use opencodex_agent::{VISION_TABLE_VERSION, supports_vision};
use opencodex_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("OpenCodex Doctor — System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file — using defaults (run `opencodex onboard`)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  1 issue found. Fix the configuration and re-run.");
            return Ok(());
        }
    };

    if config.has_api_key() || opencodex_providers::factory::is_local(&config.default_provider) {
        println!("  ✅ Credentials available for '{}'", config.default_provider);
    } else {
        println!(
            "  ❌ No API key for '{}' — set OPENCODEX_API_KEY or add api_key to config.toml",
            config.default_provider
        );
        issues += 1;
    }

    let vision = if supports_vision(&config.default_model) {
        "vision"
    } else {
        "text only"
    };
    println!(
        "  ✅ Model '{}' ({vision}, capability table v{VISION_TABLE_VERSION})",
        config.default_model
    );

    match opencodex_gateway::open_store(&config).await {
        Ok(store) => println!("  ✅ Storage backend '{}' opened", store.name()),
        Err(e) => {
            println!("  ❌ Storage backend '{}' failed: {e}", config.storage.backend);
            issues += 1;
        }
    }

    let workspace = config.sandbox.resolved_workspace_root();
    if workspace.is_dir() {
        println!("  ✅ Workspace {}", workspace.display());
    } else {
        println!(
            "  ⚠️  Workspace {} does not exist — it will be created on start",
            workspace.display()
        );
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
