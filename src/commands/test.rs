use anyhow::Result;
use colored::Colorize;
use quality_gate::config;
use std::path::Path;

/// Execute the test command
///
/// This validates the configuration file without starting the service
pub fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Testing configuration...".cyan());

    let cfg = match config::load_config_from(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{} {}", "✗ Configuration test failed:".red().bold(), e);
            return Err(e);
        }
    };

    println!("{}", "✓ Configuration test successful".green().bold());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {}", "Log Level".cyan(), cfg.server.log_level);
    println!("  {}: {}", "Log Format".cyan(), cfg.server.log_format);
    println!("  {}: {}", "Database".cyan(), cfg.coverage.database_path);
    println!(
        "  {}: {}",
        "Default Lookback".cyan(),
        humantime::format_duration(cfg.coverage.default_lookback_window)
    );
    println!(
        "  {}: {}",
        "Report Deadline".cyan(),
        humantime::format_duration(cfg.reports.deadline)
    );
    println!();

    println!(
        "  {}: {}, {}, {}",
        "Identity Attributes".cyan(),
        cfg.telemetry.service_name_key,
        cfg.telemetry.api_name_key,
        cfg.telemetry.api_version_key
    );
    println!();

    println!("  {}: {}", "Quality Gates".cyan(), cfg.quality_gates.len());
    for (idx, gate) in cfg.quality_gates.iter().enumerate() {
        let criteria: Vec<&str> = gate.criteria.iter().map(|c| c.as_str()).collect();
        println!("    {}. {} [{}]", idx + 1, gate.name.bold(), criteria.join(", "));
    }
    if cfg.quality_gates.is_empty() {
        println!("    {}", "(none configured; calculations will answer 404)".yellow());
    }
    println!();

    println!("{}", "Spec Index:".bold());
    match &cfg.spec_index.base_url {
        Some(url) => println!("    Index service: {} ({})", "enabled".green(), url),
        None => println!("    Index service: {}", "disabled".yellow()),
    }
    println!("    Static APIs: {}", cfg.spec_index.apis.len());
    for api in &cfg.spec_index.apis {
        println!(
            "      - {}/{}@{} → {}",
            api.service_name, api.api_name, api.api_version, api.spec_url
        );
    }

    Ok(())
}
