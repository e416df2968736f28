use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use lib::backend::CommandBackend;
use lib::channels::{EventHub, EventSource, Subscription, TOKEN_CHANNEL};
use lib::llm::{OllamaClient, OllamaGenerator};
use lib::session::{AlternateBackend, GenerationSettings, SendOutcome, SessionController};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Hearth CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config.json, and the model directory.
    Init {
        /// Config file path (default: HEARTH_CONFIG_PATH or ~/.hearth/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat interactively; replies stream as they are generated.
    Chat {
        /// Config file path (default: HEARTH_CONFIG_PATH or ~/.hearth/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Ollama server for the alternate backend (default from config or OLLAMA_HOST)
        #[arg(long, value_name = "URL")]
        ollama_url: Option<String>,

        /// Route every request to this Ollama model
        #[arg(long, value_name = "NAME")]
        ollama_model: Option<String>,

        /// Token budget per reply (1..=1024)
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Sampling temperature (0..=2)
        #[arg(long)]
        temperature: Option<f64>,
    },

    /// List models available on the Ollama server.
    Models {
        /// Config file path (default: HEARTH_CONFIG_PATH or ~/.hearth/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Ollama server URL (default from config or OLLAMA_HOST)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("hearth {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            ollama_url,
            ollama_model,
            max_tokens,
            temperature,
        }) => {
            let overrides = ChatOverrides {
                ollama_url,
                ollama_model,
                max_tokens,
                temperature,
            };
            if let Err(e) = run_chat(config, overrides).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Models { config, url }) => {
            if let Err(e) = run_models(config, url).await {
                log::error!("models failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_models(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let url = url.unwrap_or_else(|| lib::config::resolve_ollama_url(&config));
    let client = OllamaClient::new(Some(url));
    let models = client.list_models().await?;
    if models.is_empty() {
        println!("no models on {}", client.base_url());
    }
    for m in models {
        match m.size {
            Some(size) => println!("{}\t{:.1} GB", m.name, size as f64 / 1e9),
            None => println!("{}", m.name),
        }
    }
    Ok(())
}

struct ChatOverrides {
    ollama_url: Option<String>,
    ollama_model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
}

impl ChatOverrides {
    /// Apply command-line values on top of the configured settings. Returns the Ollama URL
    /// when it had no alternate backend to apply to.
    fn apply(self, settings: &mut GenerationSettings, configured_url: &str) -> Option<String> {
        if let Some(n) = self.max_tokens {
            settings.max_tokens = n;
        }
        if let Some(t) = self.temperature {
            settings.temperature = t;
        }
        if let Some(model) = self.ollama_model {
            let url = self.ollama_url.unwrap_or_else(|| configured_url.to_string());
            settings.alternate = Some(AlternateBackend { url, model });
            return None;
        }
        match (self.ollama_url, settings.alternate.as_mut()) {
            (Some(url), Some(alt)) => {
                alt.url = url;
                None
            }
            (url, _) => url,
        }
    }
}

async fn run_chat(config_path: Option<PathBuf>, overrides: ChatOverrides) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, path) = lib::config::load_config(config_path)?;
    let mut settings = lib::config::generation_settings(&config, &path);
    if let Some(unused) = overrides.apply(&mut settings, &lib::config::resolve_ollama_url(&config)) {
        log::warn!(
            "--ollama-url {} ignored: no Ollama model given (--ollama-model) or enabled in config",
            unused
        );
    }

    let hub = EventHub::new();
    let mut backend = CommandBackend::new(hub.emitter(TOKEN_CHANNEL));
    if let Some(model) = config.local.ollama_model.as_deref() {
        let client = OllamaClient::new(Some(lib::config::resolve_ollama_url(&config)));
        backend = backend.with_local_generator(Arc::new(OllamaGenerator::new(client, model)));
    }
    let controller = SessionController::new(Arc::new(hub.clone()), Arc::new(backend), settings);

    // Separate listener so replies print as they stream.
    let mut printer = hub.listen(TOKEN_CHANNEL).await?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/history") {
            for turn in controller.conversation() {
                println!("[{}] {}", turn.role, turn.content);
            }
            continue;
        }

        write!(stdout, "< ")?;
        stdout.flush()?;
        let (outcome, streamed) = stream_reply(&controller, &mut printer, input).await?;
        println!();
        match outcome {
            SendOutcome::Completed(turn) => {
                if turn.content != streamed {
                    println!("(trimmed) {}", turn.content);
                }
            }
            SendOutcome::Failed { message, .. } => eprintln!("chat error: {}", message),
            SendOutcome::SubscribeFailed(reason) => eprintln!("chat error: {}", reason),
            SendOutcome::Abandoned(reason) => eprintln!("chat error: {}", reason),
            SendOutcome::Rejected(r) => eprintln!("chat: {}", r),
        }
    }

    Ok(())
}

/// Send one prompt and echo fragments from `printer` until the exchange ends.
async fn stream_reply(
    controller: &SessionController,
    printer: &mut Subscription,
    input: &str,
) -> anyhow::Result<(SendOutcome, String)> {
    use std::io::Write;

    let mut streamed = String::new();
    let mut echo = |fragment: String| -> std::io::Result<()> {
        let mut out = std::io::stdout();
        write!(out, "{}", fragment)?;
        out.flush()?;
        streamed.push_str(&fragment);
        Ok(())
    };

    let send = controller.send(input);
    tokio::pin!(send);
    let outcome = loop {
        tokio::select! {
            biased;
            Some(fragment) = printer.next_fragment() => echo(fragment)?,
            outcome = &mut send => break outcome,
        }
    };
    while let Some(fragment) = printer.try_next_fragment() {
        echo(fragment)?;
    }
    Ok((outcome, streamed))
}
