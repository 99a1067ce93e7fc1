//! `switchyard providers`: what is registered and what the chain will use.

use std::fmt::Write;
use switchyard_core::{default_model, process_env, FileConfig, Router};
use switchyard_provider::{ProviderConfig, ToolCalling};

pub fn run(router: &Router, file: &FileConfig) -> anyhow::Result<()> {
    print!("{}", render(router, file, process_env));
    Ok(())
}

fn render<F>(router: &Router, file: &FileConfig, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let chain = router.config().chain();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<14} {:<11} {:<7} {:<11} {}",
        "PROVIDER", "TOOLS", "IMAGES", "CONFIGURED", "ROLE"
    );

    for name in router.registry().names() {
        let Some(provider) = router.registry().get(&name) else {
            continue;
        };
        let caps = provider.capabilities();

        let position = chain.iter().position(|entry| entry.provider == name);
        let target: ProviderConfig = match position {
            Some(idx) => chain[idx].clone(),
            None => file.target(&name, default_model(&name), &env),
        };
        let role = match position {
            Some(0) => format!("primary ({})", target.model_id),
            Some(idx) => format!("fallback #{idx} ({})", target.model_id),
            None => "-".to_string(),
        };
        let tools = match caps.tool_calling {
            ToolCalling::Native => "native",
            ToolCalling::PromptEmulated => "emulated",
        };
        let configured = if provider.is_configured(&target) { "yes" } else { "no" };
        let images = if caps.images { "yes" } else { "no" };

        let _ = writeln!(
            out,
            "{name:<14} {tools:<11} {images:<7} {configured:<11} {role}"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchyard_core::RouterConfig;

    fn env(key: &str) -> Option<String> {
        (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
    }

    fn line<'a>(out: &'a str, name: &str) -> &'a str {
        out.lines()
            .find(|l| l.starts_with(&format!("{name} ")))
            .unwrap()
    }

    fn configured(out: &str, name: &str) -> String {
        line(out, name).split_whitespace().nth(3).unwrap().to_string()
    }

    #[test]
    fn test_render_roles_and_status() {
        let file: FileConfig = serde_json::from_str(
            r#"{"custom": [{"name": "corp", "api_format": "openai", "base_url": "http://corp/v1"}]}"#,
        )
        .unwrap();
        let config = RouterConfig::new(ProviderConfig::new("anthropic", "claude-x"))
            .with_fallback(ProviderConfig::new("ollama", "llama3.2"));
        let router = Router::new(config, Arc::new(file.registry())).unwrap();

        let out = render(&router, &file, env);

        assert!(out.starts_with("PROVIDER"));
        let anthropic = line(&out, "anthropic");
        assert!(anthropic.contains("primary (claude-x)"));
        assert_eq!(configured(&out, "anthropic"), "no");

        let ollama = line(&out, "ollama");
        assert!(ollama.contains("emulated"));
        assert!(ollama.contains("fallback #1 (llama3.2)"));
        assert_eq!(configured(&out, "ollama"), "yes");

        assert_eq!(configured(&out, "openai"), "yes");
        assert_eq!(configured(&out, "corp"), "no");
        assert!(line(&out, "corp").ends_with('-'));
    }
}
