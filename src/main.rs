use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use mystic_forest::client;

const DEFAULT_LOG_FILE: &str = "mystic-forest.log";

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: mystic-forest [--api-url <url>] [--wallet-rpc <url>] [--log-file <path>]\n\
         \n\
         Flags:\n\
           --api-url <url>     Story backend base URL (default {})\n\
           --wallet-rpc <url>  Wallet provider JSON-RPC endpoint; omit to\n\
                               disable wallet features\n\
           --log-file <path>   Log destination (default {DEFAULT_LOG_FILE})",
        client::DEFAULT_API_URL,
    );
    std::process::exit(0);
}

fn parse_cli_args() -> Result<(client::AppConfig, String)> {
    let mut args = std::env::args().skip(1);
    let mut api_url: Option<String> = None;
    let mut wallet_rpc_url: Option<String> = None;
    let mut log_file: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--api-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--api-url requires a URL argument"))?;
                if api_url.is_some() {
                    return Err(eyre!("--api-url may only be specified once"));
                }
                api_url = Some(url);
            }
            "--wallet-rpc" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet-rpc requires a URL argument"))?;
                if wallet_rpc_url.is_some() {
                    return Err(eyre!("--wallet-rpc may only be specified once"));
                }
                wallet_rpc_url = Some(url);
            }
            "--log-file" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--log-file requires a path argument"))?;
                if log_file.is_some() {
                    return Err(eyre!("--log-file may only be specified once"));
                }
                log_file = Some(path);
            }
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let config = client::AppConfig {
        api_url: api_url.unwrap_or_else(|| client::DEFAULT_API_URL.to_string()),
        wallet_rpc_url,
    };
    Ok((config, log_file.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())))
}

// The terminal belongs to the UI, so logs go to a file.
fn init_tracing(log_file: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let path = Path::new(log_file);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("--log-file must name a file"))?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let (config, log_file) = parse_cli_args()?;
    let _log_guard =
        init_tracing(&log_file).wrap_err("failed to initialize file logging")?;
    tracing::info!("starting mystic-forest client");
    client::run_app(config).await
}
