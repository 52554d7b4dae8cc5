use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use queuepilot_core::actions::ActionBatch;
use queuepilot_core::config::{ConfigLoader, QueuePilotConfig};
use queuepilot_core::errors::InvocationError;
use queuepilot_core::llm::providers::create_chat_model;
use queuepilot_core::llm::{normalize, ChatModelExt, OutputFormat};
use queuepilot_core::transport::ControlClient;
use queuepilot_core::{estimate_tokens, Message};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

#[derive(Parser, Debug)]
#[clap(
    name = "QueuePilot",
    author,
    version = "0.1.0",
    about = "Local-model browser agent tooling for queue booking sites"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "queuepilot.yaml")]
    config: PathBuf,

    #[clap(long, short, help = "Log level (overrides logging.level)")]
    log_level: Option<String>,

    #[clap(long, help = "Append logs to this file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize a raw model completion read from a file or stdin
    Normalize {
        #[clap(long, short)]
        file: Option<PathBuf>,

        #[clap(long, help = "Strictly parse the result as an action batch")]
        validate: bool,
    },
    /// Ask the model for a free-text answer
    Ask {
        prompt: String,

        #[clap(long, short)]
        system: Option<String>,
    },
    /// Ask the model for the next browser action
    Act {
        prompt: String,

        #[clap(long, short)]
        system: Option<String>,
    },
    /// Estimate the token count of a file or stdin
    Tokens {
        #[clap(long, short)]
        file: Option<PathBuf>,
    },
    /// Open the browser control channel, optionally send one command, close it
    Probe {
        ws_url: Option<String>,

        #[clap(long, short, help = "CDP method to call, e.g. Browser.getVersion")]
        method: Option<String>,

        #[clap(long, short, default_value = "{}", help = "JSON params for the method")]
        params: String,
    },
}

const DEFAULT_AGENT_PROMPT: &str = "You control a web browser to book a queue slot. \
Reply with exactly one JSON object holding an \"action\" array with a single action.";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::from_file_or_env(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    // Logging depends on the loaded config, so the loader runs before any
    // logger exists; report where the config came from once it does.
    init_logging(&cli, &config)?;

    log::info!("{}", describe_config_source(&cli.config));
    log::info!("Model  : {}", config.llm.model);
    log::info!("Server : {}", config.llm.base_url);

    let outcome = match cli.command {
        Commands::Normalize { file, validate } => run_normalize(file, validate).await,
        Commands::Ask { prompt, system } => run_ask(&config, prompt, system).await,
        Commands::Act { prompt, system } => run_act(&config, prompt, system).await,
        Commands::Tokens { file } => {
            let text = read_input(file).await?;
            println!("{}", estimate_tokens(&text));
            Ok(())
        }
        Commands::Probe {
            ws_url,
            method,
            params,
        } => run_probe(&config, ws_url, method, &params).await,
    };

    if let Err(err) = &outcome {
        if let Some(invocation) = err.downcast_ref::<InvocationError>() {
            log::error!("Invocation failed: {}", invocation);
            if invocation.is_context_overflow() {
                eprintln!(
                    "The prompt does not fit the model's context window. \
                     Restart the inference server with a larger context size (e.g. 16384 tokens)."
                );
            }
        }
    }
    outcome
}

fn init_logging(cli: &Cli, config: &QueuePilotConfig) -> Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level_filter);

    if let Some(path) = cli.log_file.as_ref().or(config.logging.file.as_ref()) {
        use std::fs::OpenOptions;

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn describe_config_source(path: &Path) -> String {
    if path.is_file() {
        format!("Config : {}", path.display())
    } else {
        format!(
            "Config : {} not found, using defaults and environment",
            path.display()
        )
    }
}

async fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

async fn run_normalize(file: Option<PathBuf>, validate: bool) -> Result<()> {
    let raw = read_input(file).await?;
    let normalized = normalize(&raw);

    if validate {
        let format = OutputFormat::of::<ActionBatch>(Default::default());
        format
            .validate(&normalized)
            .map_err(|e| anyhow::anyhow!("Normalized text is not a valid action batch: {}", e))?;
    }

    println!("{}", normalized);
    Ok(())
}

fn build_messages(prompt: String, system: Option<String>) -> Vec<Message> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));
    messages
}

async fn run_ask(config: &QueuePilotConfig, prompt: String, system: Option<String>) -> Result<()> {
    let client = create_chat_model(&config.llm)?;
    let messages = build_messages(prompt, system);
    let prompt_tokens: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    log::debug!("Estimated prompt tokens: {}", prompt_tokens);

    let completion = client.invoke(messages).await?;
    if let Some(usage) = &completion.usage {
        log::info!(
            "Usage: {} prompt + {} completion = {} tokens",
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens
        );
    }
    println!("{}", completion.completion);
    Ok(())
}

async fn run_act(config: &QueuePilotConfig, prompt: String, system: Option<String>) -> Result<()> {
    let client = create_chat_model(&config.llm)?;
    let system = system.unwrap_or_else(|| DEFAULT_AGENT_PROMPT.to_string());
    let messages = build_messages(prompt, Some(system));

    let completion = client.invoke_structured::<ActionBatch>(messages).await?;
    if let Some(action) = completion.completion.first() {
        log::info!("Next action: {}", action.name());
    }
    println!("{}", serde_json::to_string_pretty(&completion.completion)?);
    Ok(())
}

async fn run_probe(
    config: &QueuePilotConfig,
    ws_url: Option<String>,
    method: Option<String>,
    params: &str,
) -> Result<()> {
    let connect_params = config
        .channel
        .connect_params(ws_url.as_deref())
        .context("No control channel URL given and channel.ws_url is not configured")?;
    let params: serde_json::Value =
        serde_json::from_str(params).context("--params must be a JSON value")?;

    let mut client = ControlClient::new(connect_params);
    client.start().await?;
    let connection = client.connection()?;
    println!(
        "Connected to {} (ping timeout {}s, close timeout {}s)",
        connection.url(),
        connection.policy().ping_timeout.as_secs(),
        connection.policy().close_timeout.as_secs()
    );

    if let Some(method) = method {
        let reply = connection.call(&method, params).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
    }

    client.stop().await?;
    Ok(())
}
