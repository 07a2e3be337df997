//! `devloop config`: configuration management commands.

use devloop_config::AppConfig;

#[derive(Debug, Clone, Copy, Default, clap::Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    #[default]
    Show,
    /// Print the config file location
    Path,
    /// Load and validate the configuration
    Validate,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Show => show(),
        ConfigAction::Path => path(),
        ConfigAction::Validate => validate(),
    }
}

fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}

fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for warning in &warnings {
            println!("   Warning: {warning}");
        }
    }

    println!();
    println!("   Model:       {}", config.llm.model);
    println!("   Agent:       {}", config.agent.default_agent);
    println!("   Delegate:    {}", config.agent.delegate_agent);
    println!("   Iterations:  {}", config.agent.max_iterations);
    println!("   Storage:     {} ({})", config.storage.backend, config.storage.path.display());
    println!("   Workspace:   {}", config.runtime.workspace_dir.display());
    Ok(())
}

fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set DEVLOOP_LLM_API_KEY or LLM_API_KEY)");
    }
    if config.agent.max_budget_per_task.is_none() {
        warnings.push("No per-task budget; only the iteration limit stops a runaway task");
    }
    if !config.agent.checkpoint {
        warnings.push("Checkpointing is off; sessions cannot be resumed");
    }
    if config.storage.backend == "memory" {
        warnings.push("Memory storage loses every session when the process exits");
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn defaults_warn_about_key_and_budget() {
        let mut config = AppConfig::default();
        let found = warnings(&config);
        assert_eq!(found.len(), 2);

        config.llm.api_key = Some("sk-test".into());
        config.agent.max_budget_per_task = Some(1.0);
        assert!(warnings(&config).is_empty());
    }
}
