//! ai-gateway — 流式网关命令行工具
//!
//! Usage:
//!   ai-gateway send <provider> <model> <prompt> [--system <text>] [--config <file>]
//!   ai-gateway set-key <provider>        Read a key from stdin into the OS keyring
//!   ai-gateway delete-key <provider>     Remove a stored key
//!   ai-gateway providers                 List providers that have a stored key

use anyhow::{anyhow, bail, Context};
use futures::StreamExt;
use std::io::{BufRead, Write};

use ai_stream_gateway::{
    CredentialStore, FinishReason, Gateway, GatewayConfig, KeyringCredentialStore, ProviderId,
    UnifiedEvent, UnifiedRequest,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "send" => cmd_send(&args[2..]).await,
        "set-key" => cmd_set_key(&args[2..]),
        "delete-key" => cmd_delete_key(&args[2..]),
        "providers" => cmd_providers(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("ai-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"ai-gateway — multi-provider streaming chat gateway

USAGE:
    ai-gateway <COMMAND> [OPTIONS]

COMMANDS:
    send <provider> <model> <prompt>   Stream one turn to stdout
        --system <text>                System prompt
        --config <file>                YAML gateway config
    set-key <provider>                 Store a key read from stdin
    delete-key <provider>              Delete a stored key
    providers [--config <file>]        List providers with a stored key
    version                            Show version information
    help                               Show this help message

PROVIDERS:
    openai, openrouter, gemini, anthropic

ENVIRONMENT:
    RUST_LOG                           Log filter (default: info)
    AI_GATEWAY_*                       Config overrides (timeouts, proxy, base URLs)"#
    );
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Positional arguments with `--flag value` pairs removed.
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn load_config(args: &[String]) -> anyhow::Result<GatewayConfig> {
    let config = match flag_value(args, "--config") {
        Some(path) => GatewayConfig::from_yaml_file(path)
            .with_context(|| format!("loading {path}"))?
            .with_env_overrides(),
        None => GatewayConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn parse_provider(raw: Option<&str>) -> anyhow::Result<ProviderId> {
    let raw = raw.ok_or_else(|| anyhow!("missing <provider>"))?;
    ProviderId::parse(raw).ok_or_else(|| {
        anyhow!("unknown provider '{raw}' (expected openai, openrouter, gemini or anthropic)")
    })
}

async fn cmd_send(args: &[String]) -> anyhow::Result<()> {
    let pos = positionals(args);
    let provider = parse_provider(pos.first().copied())?;
    let model = pos.get(1).ok_or_else(|| anyhow!("missing <model>"))?;
    let prompt = pos.get(2).ok_or_else(|| anyhow!("missing <prompt>"))?;

    let gateway = Gateway::new(load_config(args)?)?;
    let mut builder = UnifiedRequest::builder(provider, *model).user_message(*prompt);
    if let Some(system) = flag_value(args, "--system") {
        builder = builder.system_prompt(system);
    }

    let mut events = gateway.send(builder.build())?;
    let mut stdout = std::io::stdout().lock();
    while let Some(event) = events.next().await {
        match event {
            UnifiedEvent::TextChunk { text } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            UnifiedEvent::FunctionCallStarted { name, call_id } => {
                writeln!(stdout, "\n[function call {name} ({call_id})]")?;
            }
            UnifiedEvent::FunctionCallArgumentDelta { .. } => {}
            UnifiedEvent::FunctionCallCompleted { name, arguments, .. } => {
                writeln!(
                    stdout,
                    "[{name} arguments: {}]",
                    serde_json::Value::Object(arguments)
                )?;
            }
            UnifiedEvent::StreamEnded { reason } => {
                let reason = match reason {
                    FinishReason::Stop => "stop",
                    FinishReason::Length => "length",
                    FinishReason::ToolCall => "tool_call",
                };
                writeln!(stdout, "\n[ended: {reason}]")?;
            }
            UnifiedEvent::StreamFailed { kind, message } => {
                writeln!(stdout)?;
                bail!("{kind} error: {message}");
            }
        }
    }
    Ok(())
}

fn cmd_set_key(args: &[String]) -> anyhow::Result<()> {
    let provider = parse_provider(positionals(args).first().copied())?;
    let config = load_config(args)?;

    eprint!("Enter API key for {provider}: ");
    std::io::stderr().flush()?;
    let mut secret = String::new();
    std::io::stdin().lock().read_line(&mut secret)?;
    let secret = secret.trim();
    if secret.is_empty() {
        bail!("empty key, nothing stored");
    }

    KeyringCredentialStore::new(config.keyring_service).save(provider, secret)?;
    eprintln!("Stored key for {provider}.");
    Ok(())
}

fn cmd_delete_key(args: &[String]) -> anyhow::Result<()> {
    let provider = parse_provider(positionals(args).first().copied())?;
    let config = load_config(args)?;
    KeyringCredentialStore::new(config.keyring_service).delete(provider)?;
    eprintln!("Deleted key for {provider}.");
    Ok(())
}

fn cmd_providers(args: &[String]) -> anyhow::Result<()> {
    let gateway = Gateway::new(load_config(args)?)?;
    let available = gateway.available_providers();
    for id in gateway.registry().ids() {
        let mark = if available.contains(id) { "key stored" } else { "no key" };
        println!("{:<12} {mark}", id.as_str());
    }
    Ok(())
}
