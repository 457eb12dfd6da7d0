//! ChatPlug client CLI binary.
//!
//! Bootstrap tool for plugin instances.
//!
//! # Commands
//!
//! - `check` - Validate the instance configuration without connecting
//! - `listen` - Connect to the coordinator and print incoming messages

use std::future::Future;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};
use chatplug::{
    config::{ENV_ACCESS_TOKEN, ENV_HTTP_ENDPOINT, ENV_INSTANCE_ID, ENV_WS_ENDPOINT},
    protocol::REDACTED,
    ChatPlugError, Client, ClientConfig, ClientEvent, ConfigStore, ConfigurationRequest,
    FileConfigStore, Message, MessageAuthorInput, MessageInput, VERSION,
};

#[derive(Parser)]
#[command(name = "chatplug")]
#[command(version = VERSION)]
#[command(about = "ChatPlug client - link a plugin instance to the coordinator", long_about = None)]
struct Cli {
    /// TOML configuration file (default: environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and show what the client would use
    Check,

    /// Connect and print incoming messages
    Listen {
        /// Configuration schema to negotiate (JSON `{"fields": [...]}`)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Send every received message back to its thread
        #[arg(long)]
        echo: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Log as JSON lines
        #[arg(long)]
        json_logs: bool,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => startup_failure(&e),
    };

    match cli.command {
        Commands::Check => cmd_check(&config),
        Commands::Listen {
            schema,
            echo,
            verbose,
            json_logs,
        } => cmd_listen(config, schema, echo, verbose, json_logs),
    }
}

fn load_config(path: Option<&Path>) -> chatplug::Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

/// Explain a configuration problem and exit non-zero.
fn startup_failure(err: &ChatPlugError) -> ! {
    eprintln!("Cannot start: {err}");
    if matches!(err, ChatPlugError::Startup(_)) {
        eprintln!();
        eprintln!("The client needs its coordinator addresses and identity. Set:");
        eprintln!("  {ENV_HTTP_ENDPOINT:<14} GraphQL HTTP endpoint (http/https)");
        eprintln!("  {ENV_WS_ENDPOINT:<14} GraphQL WebSocket endpoint (ws/wss)");
        eprintln!("  {ENV_ACCESS_TOKEN:<14} access token issued by the coordinator");
        eprintln!("  {ENV_INSTANCE_ID:<14} identifier of this plugin instance");
        eprintln!("or pass --config <file.toml>.");
    }
    std::process::exit(1);
}

fn cmd_check(config: &ClientConfig) -> anyhow::Result<()> {
    let store = FileConfigStore::new(config.cache_dir.clone());

    println!("Configuration OK");
    println!("  HTTP endpoint:  {}", config.http_endpoint);
    println!("  WS endpoint:    {}", config.ws_endpoint);
    println!("  Access token:   {REDACTED}");
    println!("  Instance:       {}", config.instance_id);
    println!("  Cache file:     {}", store.path_for(&config.instance_id).display());

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(store.load(&config.instance_id)) {
        Ok(Some(cached)) => println!(
            "  Cached fields:  {}",
            cached.field_names().join(", ")
        ),
        Ok(None) => println!("  Cached fields:  (none)"),
        Err(e) => println!("  Cached fields:  unreadable ({e})"),
    }

    Ok(())
}

fn cmd_listen(
    config: ClientConfig,
    schema: Option<PathBuf>,
    echo: bool,
    verbose: bool,
    json_logs: bool,
) -> anyhow::Result<()> {
    // Initialize logging
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let schema = schema
        .map(|path| -> anyhow::Result<ConfigurationRequest> {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        })
        .transpose()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let client = match Client::new(config) {
            Ok(client) => client,
            Err(e) => startup_failure(&e),
        };
        let mut events = client.events();
        let redact_with = schema.clone().unwrap_or_default();

        client.connect(schema).await?;

        let client = &client;
        let redact_with = &redact_with;
        pump_events(&mut events, tokio::signal::ctrl_c(), move |event| async move {
            match event {
                ClientEvent::Message { target_thread_id, message } => {
                    print_message(&target_thread_id, &message);
                    if echo {
                        echo_back(client, &message).await;
                    }
                },
                ClientEvent::Config(values) => {
                    let shown = values.redacted(redact_with);
                    println!("configuration: {}", serde_json::to_string(&shown)?);
                },
                ClientEvent::Ready => tracing::info!("listening for messages"),
            }
            Ok::<_, anyhow::Error>(())
        })
        .await?;

        client.shutdown();
        Ok::<_, anyhow::Error>(())
    })
}

/// Handle events one at a time until the stream ends or `shutdown` fires.
///
/// `shutdown` is polled across iterations, so a signal arriving while a
/// handler runs is seen on the next turn.
async fn pump_events<E, S, H, F>(events: &mut E, shutdown: S, mut handle: H) -> anyhow::Result<()>
where
    E: Stream<Item = ClientEvent> + Unpin,
    S: Future,
    H: FnMut(ClientEvent) -> F,
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                handle(event).await?;
            },
            _ = &mut shutdown => {
                tracing::info!("interrupted");
                break;
            },
        }
    }
    Ok(())
}

fn print_message(target_thread_id: &str, message: &Message) {
    println!(
        "[{target_thread_id}] {}: {}",
        message.author.username, message.body
    );
    for attachment in &message.attachments {
        println!("    {:?} {}", attachment.kind, attachment.source_url);
    }
}

async fn echo_back(client: &Client, message: &Message) {
    let author = MessageAuthorInput::new(
        message.author.origin_id.clone(),
        message.author.username.clone(),
        message.author.avatar_url.clone(),
    );
    let input = MessageInput::new(
        message.thread.origin_id.clone(),
        uuid::Uuid::new_v4().to_string(),
        author,
        message.body.clone(),
    );
    if let Err(e) = client.send(&input).await {
        tracing::warn!(error = %e, "echo failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::stream;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shutdown_during_handler_stops_pump() {
        let mut events = stream::iter(vec![ClientEvent::Ready]).chain(stream::pending());
        let (tx, rx) = oneshot::channel::<()>();
        let mut tx = Some(tx);

        let pumped = tokio::time::timeout(
            Duration::from_secs(5),
            pump_events(&mut events, rx, |_| {
                // signal arrives while the handler is still busy
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, anyhow::Error>(())
                }
            }),
        )
        .await;

        assert!(matches!(pumped, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_pump_ends_with_stream() {
        let mut events = stream::iter(vec![ClientEvent::Ready, ClientEvent::Ready]);
        let mut seen = 0;
        pump_events(&mut events, std::future::pending::<()>(), |_| {
            seen += 1;
            async { Ok::<_, anyhow::Error>(()) }
        })
        .await
        .unwrap();
        assert_eq!(seen, 2);
    }
}
