//! `devloop agents`: list the agents that can be run or delegated to.

use devloop_agent::AgentRegistry;
use devloop_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = AgentRegistry::with_defaults(&config.agent.delegate_agent);
    for line in listing(&registry, &config) {
        println!("{line}");
    }
    Ok(())
}

fn listing(registry: &AgentRegistry, config: &AppConfig) -> Vec<String> {
    registry
        .names()
        .into_iter()
        .map(|name| {
            let mut roles = Vec::new();
            if name == config.agent.default_agent {
                roles.push("default");
            }
            if name == config.agent.delegate_agent {
                roles.push("delegate");
            }
            if roles.is_empty() {
                name.to_string()
            } else {
                format!("{name} ({})", roles.join(", "))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_default_and_delegate() {
        let config = AppConfig::default();
        let registry = AgentRegistry::with_defaults(&config.agent.delegate_agent);
        assert_eq!(
            listing(&registry, &config),
            ["codeact (default)", "searcher (delegate)"]
        );
    }
}
