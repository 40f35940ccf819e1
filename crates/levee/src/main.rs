use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use axum::{Json, Router, routing::get};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use levee::llm::LlmClient;
use levee::ws::{self, DEFAULT_ROUTE, RelayConfig};
use levee::{ChatMessage, ChatRequest};

const APP_NAME: &str = "levee";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!("using config file {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Chat(cmd) => async_chat(ctx, cmd),
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_chat(ctx: RuntimeContext, cmd: ChatCommand) -> Result<()> {
    handle_chat(&ctx, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Levee chat relay and LLM gateway client.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the WebSocket chat relay
    Serve(ServeCommand),
    /// Send one prompt to the LLM gateway and print the reply
    Chat(ChatCommand),
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Address to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct ChatCommand {
    /// Prompt to send as the user message
    prompt: String,
    /// Model alias ("haiku", "sonnet", "opus") or full model ID
    #[arg(short, long, default_value = "sonnet")]
    model: String,
    /// System prompt
    #[arg(short, long)]
    system: Option<String>,
    /// Maximum tokens to generate
    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,
    /// Sampling temperature
    #[arg(short, long, default_value_t = 0.7)]
    temperature: f32,
    /// Print chunks as they arrive instead of waiting for the full reply
    #[arg(long)]
    stream: bool,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = match &common.config {
            Some(path) if path.is_dir() => path.join("config.toml"),
            Some(path) => path.clone(),
            None => default_config_dir()?.join("config.toml"),
        };
        let config = load_or_init_config(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return;
        }

        let level = self.effective_log_level();
        let filter_level = match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "levee={filter_level},levee_relay={filter_level},tower_http={filter_level}"
            ))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(level);
        builder.try_init().ok();
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            return LevelFilter::Trace;
        }
        if self.common.debug {
            return LevelFilter::Debug;
        }
        match self.common.verbose {
            0 => LevelFilter::from_str(&self.config.logging.level).unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn client(&self) -> Result<LlmClient> {
        let llm = &self.config.llm;
        if llm.api_key.is_empty() {
            bail!(
                "llm.api_key is not set (edit {} or set LEVEE__LLM__API_KEY)",
                self.config_file.display()
            );
        }

        let client = LlmClient::new(llm.api_key.clone(), llm.base_url.clone());
        match llm.grpc_address.as_deref().filter(|a| !a.is_empty()) {
            Some(address) => Ok(client.with_grpc_address(address)),
            None if llm.base_url.is_empty() => bail!(
                "llm.base_url is not set (edit {} or set LEVEE__LLM__BASE_URL)",
                self.config_file.display()
            ),
            None => Ok(client),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    llm: LlmSection,
    server: ServerSection,
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LlmSection {
    /// API key sent with every request.
    api_key: String,
    /// Gateway base URL; `https://` enables TLS on the gRPC connection.
    base_url: String,
    /// Fixed gRPC `host:port`; discovered from the gateway when unset.
    grpc_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ServerSection {
    host: String,
    port: u16,
    route: String,
    allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            route: DEFAULT_ROUTE.to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerSection {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            route: self.route.clone(),
            allowed_origins: self.allowed_origins.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Relay routes plus `/health`, wrapped in request tracing.
fn build_app(client: Arc<LlmClient>, relay: RelayConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health))
        .merge(ws::router(client, relay))
        .layer(trace_layer)
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let server = &ctx.config.server;
    let host = cmd.host.unwrap_or_else(|| server.host.clone());
    let port = cmd.port.unwrap_or(server.port);

    let client = Arc::new(ctx.client()?);
    let relay = server.relay_config();
    let route = relay.route.clone();
    let app = build_app(client.clone(), relay);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    info!("Chat relay listening on ws://{}{}", addr, route);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    client.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn handle_chat(ctx: &RuntimeContext, cmd: ChatCommand) -> Result<()> {
    let client = ctx.client()?;

    let mut request = ChatRequest::new(cmd.model)
        .with_max_tokens(cmd.max_tokens)
        .with_temperature(cmd.temperature)
        .with_message(ChatMessage::user(cmd.prompt));
    if let Some(system) = cmd.system {
        request = request.with_system_prompt(system);
    }

    let response = if cmd.stream {
        let mut stdout = io::stdout();
        let response = client
            .chat_stream(&request, |chunk| {
                stdout.write_all(chunk.content.as_bytes())?;
                stdout.flush()?;
                Ok(())
            })
            .await?;
        println!();
        response
    } else {
        let response = client.chat(&request).await?;
        println!("{}", response.content);
        response
    };

    info!(
        "model={} input_tokens={} output_tokens={} cost_usd={:.6} latency_ms={}",
        response.model,
        response.input_tokens,
        response.output_tokens,
        response.cost_usd,
        response.latency_ms
    );

    client.close().await;
    Ok(())
}

fn load_or_init_config(config_file: &Path) -> Result<AppConfig> {
    if !config_file.exists() {
        write_default_config(config_file)?;
    }

    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(config_file)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(&env_prefix()).separator("__"))
        .build()?;

    Ok(built.try_deserialize()?)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push_str("\n# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
