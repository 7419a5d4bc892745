use std::io::Write;

use facet::Facet;
use figue as args;
use sqlpilot_types::{ExportFormat, RunQueryRequest};
use sqlpilot_web::app::{AppState, build_router};
use sqlpilot_web::config::{DEFAULT_HTTP_ADDR, WebConfig};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Facet, Debug)]
struct ServerCli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::named, default)]
    keep_uploads: bool,
}

#[derive(Facet, Debug)]
struct ClientCli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: ClientCommand,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum ClientCommand {
    Sql {
        #[facet(args::named, default)]
        url: Option<String>,
        #[facet(args::named)]
        query: String,
    },
    Schema {
        #[facet(args::named, default)]
        url: Option<String>,
    },
    Reset {
        #[facet(args::named, default)]
        url: Option<String>,
    },
    Clear {
        #[facet(args::named, default)]
        url: Option<String>,
    },
    Export {
        #[facet(args::named, default)]
        url: Option<String>,
        #[facet(args::named, default)]
        format: Option<String>,
        #[facet(args::named)]
        query: String,
    },
    Download {
        #[facet(args::named, default)]
        url: Option<String>,
        #[facet(args::named)]
        out: String,
    },
}

fn main() {
    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    if cli_args
        .first()
        .map(String::as_str)
        .is_some_and(is_client_command)
    {
        if let Err(err) = run_client() {
            eprintln!("{err}");
            std::process::exit(1);
        }
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };
    runtime.block_on(async {
        if let Err(err) = run_server().await {
            eprintln!("{err}");
            std::process::exit(1);
        }
    });
}

fn is_client_command(value: &str) -> bool {
    matches!(
        value,
        "sql" | "schema" | "reset" | "clear" | "export" | "download"
    )
}

async fn run_server() -> Result<(), String> {
    let cli = parse_server_cli()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = WebConfig::from_env()?;
    let http_addr = config.http_addr.clone();
    let state = AppState::new(config);
    state
        .store
        .ensure_upload_dir()
        .await
        .map_err(|e| e.to_string())?;

    let listener = TcpListener::bind(&http_addr)
        .await
        .map_err(|e| format!("failed to bind HTTP on {http_addr}: {e}"))?;
    info!(
        %http_addr,
        upload_dir = %state.store.upload_dir().display(),
        page_size = state.config.export_page_size,
        "sqlpilot HTTP API ready"
    );

    let app = build_router(state.clone());
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%e, "HTTP server error");
    }

    if cli.keep_uploads {
        info!("keeping uploaded files");
    } else {
        let removed = state.store.purge_upload_dir().await;
        info!(removed, "upload dir purged");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}, falling back to SIGINT only");
                let _ = ctrl_c.await;
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT, shutting down");
    }
}

fn parse_server_cli() -> Result<ServerCli, String> {
    let figue_config = args::builder::<ServerCli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("sqlpilot")
                .description("Run and export SQL against an uploaded SQLite database")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}

fn run_client() -> Result<(), String> {
    let cli = parse_client_cli()?;
    match cli.command {
        ClientCommand::Sql { url, query } => run_sql(url, query),
        ClientCommand::Schema { url } => {
            print_pretty(&http_get_text(&endpoint(url, "/api/db/schema"))?)
        }
        ClientCommand::Reset { url } => {
            print_pretty(&http_post_json(&endpoint(url, "/api/db/reset"), "{}")?)
        }
        ClientCommand::Clear { url } => {
            print_pretty(&http_post_json(&endpoint(url, "/api/db/clear"), "{}")?)
        }
        ClientCommand::Export { url, format, query } => run_export(url, format, query),
        ClientCommand::Download { url, out } => run_download(url, out),
    }
}

fn parse_client_cli() -> Result<ClientCli, String> {
    let figue_config = args::builder::<ClientCli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("sqlpilot")
                .description("CLI for a running sqlpilot server")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}

fn endpoint(url: Option<String>, path: &str) -> String {
    let base_url = url.unwrap_or_else(|| format!("http://{DEFAULT_HTTP_ADDR}"));
    format!("{}{path}", base_url.trim_end_matches('/'))
}

fn run_sql(url: Option<String>, query: String) -> Result<(), String> {
    let req = RunQueryRequest {
        sql: query,
        params: Vec::new(),
    };
    let body = serde_json::to_string(&req).map_err(|e| format!("encode sql request: {e}"))?;
    let response = http_post_json(&endpoint(url, "/api/queries/run"), &body)?;
    print_pretty(&response)
}

fn run_export(url: Option<String>, format: Option<String>, query: String) -> Result<(), String> {
    let format: ExportFormat = format.as_deref().unwrap_or("csv").parse()?;
    let url = endpoint(url, &format!("/api/queries/export/{format}"));
    let response = ureq::get(&url)
        .query("sql", &query)
        .call()
        .map_err(|e| describe_error(&url, e))?;
    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut response.into_reader(), &mut stdout)
        .map_err(|e| format!("write export to stdout: {e}"))?;
    stdout.flush().map_err(|e| format!("flush stdout: {e}"))
}

fn run_download(url: Option<String>, out: String) -> Result<(), String> {
    let url = endpoint(url, "/api/db/download");
    let response = ureq::get(&url)
        .call()
        .map_err(|e| describe_error(&url, e))?;
    let mut file =
        std::fs::File::create(&out).map_err(|e| format!("create {out}: {e}"))?;
    let bytes = std::io::copy(&mut response.into_reader(), &mut file)
        .map_err(|e| format!("write {out}: {e}"))?;
    eprintln!("wrote {bytes} bytes to {out}");
    Ok(())
}

fn print_pretty(response: &str) -> Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(response).map_err(|e| format!("decode response as json: {e}"))?;
    let pretty =
        serde_json::to_string_pretty(&value).map_err(|e| format!("pretty response: {e}"))?;
    println!("{pretty}");
    Ok(())
}

/// Surfaces the server's `{"error": ...}` body for non-2xx replies.
fn describe_error(url: &str, error: ureq::Error) -> String {
    match error {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<sqlpilot_types::ApiError>(&body)
                .map(|api| api.error)
                .unwrap_or(body);
            format!("{url}: HTTP {code}: {message}")
        }
        other => format!("{url}: {other}"),
    }
}

fn http_get_text(url: &str) -> Result<String, String> {
    let response = ureq::get(url).call().map_err(|e| describe_error(url, e))?;
    response
        .into_string()
        .map_err(|e| format!("read GET response body: {e}"))
}

fn http_post_json(url: &str, body: &str) -> Result<String, String> {
    let response = ureq::post(url)
        .set("content-type", "application/json")
        .send_string(body)
        .map_err(|e| describe_error(url, e))?;
    response
        .into_string()
        .map_err(|e| format!("read POST response body: {e}"))
}
