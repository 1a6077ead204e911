mod game;

use anyhow::{Context, Result};

use novella::config::Config;
use novella::engine::Engine;
use novella::llm::gemini::GeminiClient;
use novella::llm::ModelClient;
use novella::session::GameSession;

const USAGE: &str = "\
Usage: novella [path-to-model.gguf [gpu_layers] [context_size] [max_tokens]]

With no arguments the story is generated by Gemini; GEMINI_API_KEY must be set.
A model path switches to local inference (requires the `llama` feature).

Environment:
  GEMINI_API_KEY        model credential
  NOVELLA_MODEL         Gemini model id (default gemini-1.5-flash)
  NOVELLA_TEMPERATURE   sampling temperature (default 0.9)
  NOVELLA_TIMEOUT_SECS  per-request timeout (default 60)
  NOVELLA_MAX_RETRIES   retries for transient failures (default 2, max 10)
  NOVELLA_IMAGE_SEED    pin the background image seed (0-999)
  NOVELLA_PROMPT_FILE   replace the governing prompt

Logging: set RUST_LOG=debug or RUST_LOG=trace for verbose output";

fn main() -> Result<()> {
    // Initialize logging. Control verbosity with RUST_LOG env var:
    //   RUST_LOG=info    cargo run   # turns + state transitions
    //   RUST_LOG=debug   cargo run   # + every turn sent and the parsed scene
    //   RUST_LOG=trace   cargo run   # + raw HTTP bodies / rendered prompts
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    let config = Config::from_env().context("invalid configuration")?;

    let client: Box<dyn ModelClient> = match args.get(1) {
        Some(model_path) => local_client(model_path, &args[2..])?,
        None => gemini_client(&config)?,
    };

    println!("Backend      : {}", client.name());
    println!("  Temperature: {}", config.temperature);
    println!("  Timeout    : {:?}", config.timeout);
    println!("  Retries    : {}", config.max_retries);

    let engine = Engine::new(client, config.engine_config(), config.prompts()?);
    let mut session = GameSession::new(engine);

    game::run(&mut session, &config.background())
}

fn gemini_client(config: &Config) -> Result<Box<dyn ModelClient>> {
    let api_key = config.require_api_key().context(USAGE)?;
    let client = GeminiClient::new(api_key, config.model.as_str(), config.timeout)
        .context("failed to create Gemini client")?
        .with_base_url(&config.gemini_url);
    Ok(Box::new(client))
}

#[cfg(feature = "llama")]
fn local_client(model_path: &str, rest: &[String]) -> Result<Box<dyn ModelClient>> {
    use novella::llm::local::{LocalModel, LocalModelConfig};

    let defaults = LocalModelConfig::default();
    let config = LocalModelConfig {
        n_gpu_layers: rest.first().and_then(|s| s.parse().ok()).unwrap_or(defaults.n_gpu_layers),
        n_ctx: rest.get(1).and_then(|s| s.parse().ok()).unwrap_or(defaults.n_ctx),
        max_tokens: rest.get(2).and_then(|s| s.parse().ok()).unwrap_or(defaults.max_tokens),
        seed: defaults.seed,
    };

    println!("Loading model: {model_path}");
    println!("  GPU layers : {}", config.n_gpu_layers);
    println!("  Context    : {}", config.n_ctx);
    println!("  Max tokens : {}", config.max_tokens);

    let model = LocalModel::load(model_path, config).context("failed to load model")?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "llama"))]
fn local_client(model_path: &str, _rest: &[String]) -> Result<Box<dyn ModelClient>> {
    anyhow::bail!(
        "cannot load {model_path}: this build has no local inference; rebuild with `--features llama`"
    )
}
