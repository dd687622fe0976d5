//! `chatrecall init`: write a default config file.

use chatrecall_config::AppConfig;
use std::path::Path;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if write_default_config(&config_path)? {
        println!("Created {}", config_path.display());
        println!();
        println!("Next steps:");
        println!("  1. Add your API key to it, or set OPENAI_API_KEY");
        println!("  2. Run: chatrecall chat");
    } else {
        println!("Config already exists at {}", config_path.display());
        println!("Edit it manually or delete it and re-run init.");
    }

    Ok(())
}

/// Write the default config to `path` unless a file is already there.
/// Returns whether a file was written.
fn write_default_config(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
