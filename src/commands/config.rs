//! `fetchq config`: print the effective configuration.

use super::Settings;
use crate::app_config::LoadedConfig;

pub fn run_config_show_command(settings: &Settings, loaded: &LoadedConfig) {
    let resolved_path = loaded.path.as_ref().map_or_else(
        || "<unresolved>".to_string(),
        |path| path.display().to_string(),
    );
    println!("config_path = {resolved_path}");
    println!(
        "config_file = {}",
        if loaded.config.is_some() {
            "loaded"
        } else {
            "not found (using defaults)"
        }
    );
    println!("output_dir = {}", settings.output_dir.display());
    println!(
        "cache_db = {}",
        settings
            .cache_db
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |path| path.display().to_string())
    );
    println!("concurrency = {}", settings.engine.concurrency);
    println!("max_retries = {}", settings.max_retries);
    println!("connect_timeout_secs = {}", settings.engine.connect_timeout_secs);
    println!("read_timeout_secs = {}", settings.engine.read_timeout_secs);
    println!("user_agent = {}", settings.engine.user_agent);
}
