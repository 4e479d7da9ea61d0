use anyhow::Result;
use colored::Colorize;
use quality_gate::config;
use std::path::Path;

/// Execute the config show command
///
/// Prints the effective configuration (file, environment and defaults merged)
pub fn show(config_path: &Path) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;

    println!("{}", "Current Configuration:".bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".cyan());

    let cfg = config::load_config_from(config_path)?;

    println!("{}", "✓ Configuration is valid".green().bold());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Quality Gates: {}", cfg.quality_gates.len());
    println!("  Static APIs: {}", cfg.spec_index.apis.len());
    println!("  Scorer Concurrency: {}", cfg.coverage.scorer_concurrency);

    Ok(())
}
