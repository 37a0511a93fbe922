
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;

use super::{API_KEY_ENV_VAR, Config, ConfigError, OllamaConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Coach Retrieval Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Embedding Configuration").bold().yellow());
    eprintln!("Every backend must produce vectors of the same dimension as the index.");
    eprintln!();

    configure_embedding(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Local Model (Ollama)").bold().yellow());
    eprintln!("Used when no API key is set, and as the fallback when the remote API fails.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Retrieval").bold().yellow());
    configure_retrieval(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but retrieval needs a reachable embedding backend.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    eprintln!(
        "  Remote API: {} ({})",
        style(&config.embedding.remote.base_url).cyan(),
        style(&config.embedding.remote.model).cyan()
    );
    if config.has_remote_embedding() {
        eprintln!("  Remote API key: {}", style("configured").green());
    } else {
        eprintln!(
            "  Remote API key: {} (set {} to enable)",
            style("not set").yellow(),
            API_KEY_ENV_VAR
        );
    }

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Vector Index:").bold().yellow());
    eprintln!("  Enabled: {}", style(config.vector_index.enabled).cyan());
    eprintln!("  URI: {}", style(config.vector_index_uri()).cyan());
    eprintln!("  Table: {}", style(&config.vector_index.table_name).cyan());
    eprintln!("  Metric: {}", style("cosine").cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Top-k: {} (max {})",
        style(config.retrieval.default_top_k).cyan(),
        style(config.retrieval.max_top_k).cyan()
    );
    eprintln!(
        "  Request timeout: {}s",
        style(config.retrieval.request_timeout_secs).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_embedding(config: &mut Config) -> Result<()> {
    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(config.embedding.dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (8..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 8 and 4096")
            }
        })
        .interact_text()?;
    config.embedding.set_dimension(dimension)?;

    if Confirm::new()
        .with_prompt("Use a remote embedding API as the primary backend?")
        .default(config.has_remote_embedding())
        .interact()?
    {
        let base_url: String = Input::new()
            .with_prompt("Remote API base URL")
            .default(config.embedding.remote.base_url.clone())
            .validate_with(|input: &String| -> Result<(), ConfigError> {
                url::Url::parse(input).map_err(|_| ConfigError::InvalidUrl(input.clone()))?;
                Ok(())
            })
            .interact_text()?;

        let model: String = Input::new()
            .with_prompt("Remote embedding model")
            .default(config.embedding.remote.model.clone())
            .interact_text()?;

        let api_key = Password::new()
            .with_prompt(format!(
                "API key (leave empty to read {} at startup)",
                API_KEY_ENV_VAR
            ))
            .allow_empty_password(true)
            .interact()?;

        config.embedding.remote.base_url = base_url;
        config.embedding.remote.model = model;
        config.embedding.remote.api_key = (!api_key.trim().is_empty()).then_some(api_key);
    } else {
        config.embedding.remote.api_key = None;
    }

    config.embedding.validate()?;
    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Local embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_retrieval(config: &mut Config) -> Result<()> {
    let max_top_k: u32 = Input::new()
        .with_prompt("Maximum results per query")
        .default(config.retrieval.max_top_k)
        .interact_text()?;

    let default_top_k: u32 = Input::new()
        .with_prompt("Default results per query")
        .default(config.retrieval.default_top_k.min(max_top_k))
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 || *input > max_top_k {
                Err("Default must be between 1 and the maximum")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let timeout: u64 = Input::new()
        .with_prompt("Request timeout (seconds)")
        .default(config.retrieval.request_timeout_secs)
        .interact_text()?;

    config
        .retrieval
        .set_top_k_limits(default_top_k, max_top_k)?;
    config.retrieval.set_request_timeout(timeout)?;

    config.vector_index.enabled = Confirm::new()
        .with_prompt("Use the LanceDB vector index (local scan is always available as fallback)?")
        .default(config.vector_index.enabled)
        .interact()?;

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
