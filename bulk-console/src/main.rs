use std::{env, net::SocketAddr};

use console::{
    AdminClient, AdminClientConfig, DEFAULT_FINISHED_RUN_LIMIT, SharedState, build_control_app,
    init_logging, normalize_admin_url,
};
use tracing::info;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9180";
const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match parse_cli_args() {
        Ok(CliAction::Run(cli)) => *cli,
        Ok(CliAction::Help) => {
            print_cli_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("{}", binary_version_text());
            return Ok(());
        }
        Err(err) => {
            eprintln!("error: {err}\n");
            print_cli_help();
            return Err(err.into());
        }
    };

    init_logging()?;
    info!("{}", binary_version_text());

    let admin_url = match cli.admin_url.or_else(|| env_value("BULK_ADMIN_URL")) {
        Some(value) => normalize_admin_url(&value)?,
        None => {
            let err = "an admin url is required (--admin-url or BULK_ADMIN_URL)".to_string();
            eprintln!("error: {err}\n");
            print_cli_help();
            return Err(err.into());
        }
    };
    let listen_addr = match cli.listen_addr {
        Some(value) => value,
        None => env_value("BULK_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()?,
    };
    let batch_size = cli.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    let request_timeout_ms = cli
        .request_timeout_ms
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    let max_finished_runs = match cli.max_finished_runs {
        Some(value) => value,
        None => match env_value("BULK_MAX_FINISHED_RUNS") {
            Some(value) => parse_max_finished_runs(&value)?,
            None => DEFAULT_FINISHED_RUN_LIMIT,
        },
    };

    let client = AdminClient::new(AdminClientConfig {
        admin_url,
        auth_token: env_value("BULK_ADMIN_TOKEN"),
        request_timeout_ms,
    });
    info!(
        "admin api endpoint={} batch_size={} request_timeout_ms={} max_finished_runs={}",
        client.base_url(),
        batch_size,
        request_timeout_ms,
        max_finished_runs
    );

    let state = SharedState::with_finished_run_limit(client, batch_size, max_finished_runs);
    let app = build_control_app(state.clone());
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(
        "control endpoint listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    state.runs.shutdown();
}

#[derive(Clone, Debug, Default)]
struct CliArgs {
    admin_url: Option<String>,
    listen_addr: Option<SocketAddr>,
    batch_size: Option<u32>,
    request_timeout_ms: Option<u64>,
    max_finished_runs: Option<usize>,
}

enum CliAction {
    Run(Box<CliArgs>),
    Help,
    Version,
}

fn parse_cli_args() -> Result<CliAction, String> {
    let mut args = env::args().skip(1).peekable();
    let mut cli = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliAction::Help),
            "-V" | "--version" => return Ok(CliAction::Version),
            "--admin-url" => {
                cli.admin_url = Some(next_arg_value("--admin-url", &mut args)?);
            }
            "--listen-addr" => {
                let value = next_arg_value("--listen-addr", &mut args)?;
                cli.listen_addr = Some(
                    value
                        .parse::<SocketAddr>()
                        .map_err(|_| format!("invalid --listen-addr: {value}"))?,
                );
            }
            "--batch-size" => {
                let value = next_arg_value("--batch-size", &mut args)?;
                let parsed = value
                    .parse::<u32>()
                    .map_err(|_| format!("invalid --batch-size: {value}"))?;
                if parsed == 0 {
                    return Err("--batch-size must be greater than zero".to_string());
                }
                cli.batch_size = Some(parsed);
            }
            "--request-timeout-ms" => {
                let value = next_arg_value("--request-timeout-ms", &mut args)?;
                cli.request_timeout_ms = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid --request-timeout-ms: {value}"))?,
                );
            }
            "--max-finished-runs" => {
                let value = next_arg_value("--max-finished-runs", &mut args)?;
                cli.max_finished_runs = Some(parse_max_finished_runs(&value)?);
            }
            _ => {
                return Err(format!("unknown argument: {arg}"));
            }
        }
    }
    Ok(CliAction::Run(Box::new(cli)))
}

fn parse_max_finished_runs(value: &str) -> Result<usize, String> {
    let parsed = value
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("invalid --max-finished-runs: {value}"))?;
    if parsed == 0 {
        return Err("--max-finished-runs must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn next_arg_value(
    flag: &str,
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
) -> Result<String, String> {
    let value = args
        .next()
        .ok_or_else(|| format!("missing value for {flag}"))?;
    if value.trim().is_empty() {
        return Err(format!("value for {flag} cannot be empty"));
    }
    Ok(value)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn print_cli_help() {
    eprintln!(concat!(
        "Usage: bulk-console [options]\n\n",
        "Options:\n",
        "  --admin-url <URL>            Admin API base url (env BULK_ADMIN_URL)\n",
        "  --listen-addr <ADDR>         Control endpoint listen address (env BULK_LISTEN_ADDR, default: 127.0.0.1:9180)\n",
        "  --batch-size <N>             Default page size for batch runs (default: 100)\n",
        "  --request-timeout-ms <MS>    Timeout for each admin API page request (default: 30000)\n",
        "  --max-finished-runs <N>      Finished runs kept for inspection (env BULK_MAX_FINISHED_RUNS, default: 256)\n",
        "  -V, --version                Show version with git metadata\n",
        "  -h, --help                   Show this help\n\n",
        "Environment:\n",
        "  BULK_ADMIN_TOKEN             Bearer token sent to the admin API\n",
        "  RUST_LOG                     Log filter (default: info)\n"
    ));
}

fn binary_version_text() -> String {
    version_text(
        env!("CARGO_PKG_NAME"),
        option_env!("BULK_BUILD_GIT_TAG").unwrap_or("untagged"),
        option_env!("BULK_BUILD_GIT_COMMIT").unwrap_or("unknown"),
        option_env!("BULK_BUILD_GIT_DIRTY").unwrap_or("false"),
    )
}

fn version_text(binary: &str, git_tag: &str, git_commit: &str, git_dirty: &str) -> String {
    if matches!(git_dirty, "true" | "1" | "yes" | "dirty") {
        format!("{binary} {git_tag} (dirty commit: {git_commit})")
    } else {
        format!("{binary} {git_tag}")
    }
}
