//! The `tyger` CLI: buffer, codespec, and run subcommands over
//! `tyger-client`, plus streaming buffer reads/writes through
//! `tyger-dataplane`.

mod progress;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::io::AsyncReadExt;

use tyger_client::Client;
use tyger_config::ClientConfig;
use tyger_core::Codespec;
use tyger_dataplane::access_url::{AccessMode, AccessUrlContainer};
use tyger_dataplane::transport::HttpBlockTransport;
use tyger_dataplane::{BlockReader, BlockWriter};
use tyger_runs::RunCreateSpec;

use crate::progress::ByteProgressReporter;

#[derive(Parser, Debug)]
#[command(name = "tyger", version, about = "Command-line client for the tyger control plane")]
struct Cli {
    /// Control-plane base URL, overriding `.tyger.toml`/`TYGER_SERVER_URL`.
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// API version to pin requests to, overriding `.tyger.toml`/`TYGER_API_VERSION`.
    #[arg(long, global = true)]
    api_version: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Buffer operations.
    Buffer {
        #[command(subcommand)]
        cmd: BufferCommands,
    },
    /// Codespec operations.
    Codespec {
        #[command(subcommand)]
        cmd: CodespecCommands,
    },
    /// Run operations.
    Run {
        #[command(subcommand)]
        cmd: RunCommands,
    },
    /// Print a shell completion script.
    Completions { shell: clap_complete::Shell },
}

#[derive(Subcommand, Debug)]
enum BufferCommands {
    /// Create a new buffer.
    Create {
        #[arg(long = "tag", value_parser = parse_kv)]
        tags: Vec<(String, String)>,
        /// Time-to-live, e.g. `1h`, `30m`.
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Get a buffer by id.
    Get {
        id: String,
        #[arg(long)]
        soft_deleted: bool,
    },
    /// List buffers.
    List {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long = "exclude-tag")]
        exclude_tag: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Soft-delete a buffer.
    Delete { id: String },
    /// Restore a soft-deleted buffer.
    Restore { id: String },
    /// Purge a soft-deleted buffer immediately.
    Purge { id: String },
    /// Stream a buffer's contents to stdout.
    Read {
        id: String,
        #[arg(long, default_value_t = tyger_dataplane::DEFAULT_DOP)]
        dop: usize,
    },
    /// Stream stdin into a buffer.
    Write {
        id: String,
        #[arg(long, default_value_t = tyger_dataplane::DEFAULT_DOP)]
        dop: usize,
        #[arg(long, default_value_t = tyger_dataplane::DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CodespecCommands {
    /// Register a codespec version from a JSON file (or stdin with `-`).
    Put { name: String, file: PathBuf },
    /// Get the latest version of a codespec, or a pinned version.
    Get {
        name: String,
        #[arg(long)]
        version: Option<u64>,
    },
    /// List codespecs.
    List {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        cursor: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RunCommands {
    /// Create a run from a JSON run-create spec file (or stdin with `-`).
    Create { file: PathBuf },
    /// Get a run by id.
    Get {
        id: u64,
        /// Long-poll until the run's status changes or the server times out.
        #[arg(long)]
        watch: bool,
    },
    /// Cancel a run.
    Cancel { id: u64 },
    /// Fetch a run's archived logs.
    Logs {
        id: u64,
        #[arg(long)]
        tail: Option<usize>,
        #[arg(long)]
        timestamps: bool,
    },
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serializing response")?;
    println!("{out}");
    Ok(())
}

fn read_stdin_or_file(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut s = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut s)?;
        Ok(s)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

async fn client_for(cli: &Cli) -> Result<Client> {
    let overrides = ClientConfig {
        server_url: cli.server_url.clone(),
        api_version: cli.api_version.clone(),
        cache_file: None,
    };
    let config = ClientConfig::resolve(&std::env::current_dir()?, overrides)?;
    let server_url = config
        .server_url
        .context("no server URL configured: pass --server-url, set TYGER_SERVER_URL, or add .tyger.toml")?;
    let api_version = config.api_version.unwrap_or_else(|| "1.0".to_string());
    Client::new(server_url, api_version).map_err(|e| anyhow::anyhow!(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.cmd {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let client = client_for(&cli).await?;

    match cli.cmd {
        Commands::Buffer { cmd } => run_buffer(&client, cmd).await,
        Commands::Codespec { cmd } => run_codespec(&client, cmd).await,
        Commands::Run { cmd } => run_run(&client, cmd).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

async fn run_buffer(client: &Client, cmd: BufferCommands) -> Result<()> {
    match cmd {
        BufferCommands::Create { tags, ttl } => {
            let tags: BTreeMap<String, String> = tags.into_iter().collect();
            let ttl = ttl.map(|s| humantime::parse_duration(&s)).transpose().context("parsing --ttl")?;
            let buffer = client.create_buffer(tags, ttl).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&buffer)
        }
        BufferCommands::Get { id, soft_deleted } => {
            let buffer =
                client.get_buffer(&id, soft_deleted).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&buffer)
        }
        BufferCommands::List { tag, exclude_tag, limit, cursor } => {
            let page = client
                .list_buffers(tag.as_deref(), exclude_tag.as_deref(), limit, cursor.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&page)
        }
        BufferCommands::Delete { id } => {
            let buffer = client.delete_buffer(&id).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&buffer)
        }
        BufferCommands::Restore { id } => {
            let buffer = client.restore_buffer(&id).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&buffer)
        }
        BufferCommands::Purge { id } => {
            client.purge_buffer(&id).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(())
        }
        BufferCommands::Read { id, dop } => read_buffer(client, &id, dop).await,
        BufferCommands::Write { id, dop, block_size } => write_buffer(client, &id, dop, block_size).await,
    }
}

async fn read_buffer(client: &Client, id: &str, dop: usize) -> Result<()> {
    let transport = Arc::new(HttpBlockTransport::new(reqwest::Client::new()));
    let session: Arc<dyn tyger_dataplane::access_url::ControlPlaneSession> = Arc::new(client.clone());
    let container = AccessUrlContainer::from_buffer_id(id, AccessMode::Read, session);
    let reporter = ByteProgressReporter::new(format!("reading {id}"));

    let reader = BlockReader::new(transport).with_dop(dop);
    let mut stdout = tokio::io::stdout();
    let bytes = reader
        .read_all(&container, &mut stdout)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    reporter.finish(bytes);
    Ok(())
}

async fn write_buffer(client: &Client, id: &str, dop: usize, block_size: usize) -> Result<()> {
    let transport = Arc::new(HttpBlockTransport::new(reqwest::Client::new()));
    let session: Arc<dyn tyger_dataplane::access_url::ControlPlaneSession> = Arc::new(client.clone());
    let container = AccessUrlContainer::from_buffer_id(id, AccessMode::Write, session);
    let reporter = ByteProgressReporter::new(format!("writing {id}"));

    let writer = BlockWriter::new(transport).with_dop(dop).with_block_size(block_size);
    let mut stdin = tokio::io::stdin();
    let mut buf = Vec::new();
    stdin.read_to_end(&mut buf).await?;
    let summary = writer
        .write_all(&container, Cursor::new(buf))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    reporter.finish(summary.total_bytes);
    Ok(())
}

async fn run_codespec(client: &Client, cmd: CodespecCommands) -> Result<()> {
    match cmd {
        CodespecCommands::Put { name, file } => {
            let spec: Codespec = serde_json::from_str(&read_stdin_or_file(&file)?).context("parsing codespec JSON")?;
            let saved =
                client.put_codespec(&name, &spec).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&saved)
        }
        CodespecCommands::Get { name, version } => {
            let spec = match version {
                Some(v) => client.get_codespec_version(&name, v).await,
                None => client.get_latest_codespec(&name).await,
            }
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&spec)
        }
        CodespecCommands::List { prefix, limit, cursor } => {
            let page = client
                .list_codespecs(prefix.as_deref(), limit, cursor.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&page)
        }
    }
}

async fn run_run(client: &Client, cmd: RunCommands) -> Result<()> {
    match cmd {
        RunCommands::Create { file } => {
            let spec: RunCreateSpec =
                serde_json::from_str(&read_stdin_or_file(&file)?).context("parsing run-create spec JSON")?;
            let run = client.create_run(spec).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&run)
        }
        RunCommands::Get { id, watch } => {
            let run = client.get_run(id, watch).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&run)
        }
        RunCommands::Cancel { id } => {
            let run = client.cancel_run(id).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print_json(&run)
        }
        RunCommands::Logs { id, tail, timestamps } => {
            let logs = client
                .get_run_logs(id, tail, timestamps)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print!("{logs}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kv_splits_on_first_equals() {
        assert_eq!(parse_kv("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
    }

    #[test]
    fn parse_kv_rejects_missing_equals() {
        assert!(parse_kv("no-equals-sign").is_err());
    }

    #[test]
    fn cli_parses_buffer_create_with_tags_and_ttl() {
        let cli = Cli::parse_from(["tyger", "buffer", "create", "--tag", "env=prod", "--ttl", "1h"]);
        match cli.cmd {
            Commands::Buffer { cmd: BufferCommands::Create { tags, ttl } } => {
                assert_eq!(tags, vec![("env".to_string(), "prod".to_string())]);
                assert_eq!(ttl.as_deref(), Some("1h"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_run_get_with_watch() {
        let cli = Cli::parse_from(["tyger", "run", "get", "42", "--watch"]);
        match cli.cmd {
            Commands::Run { cmd: RunCommands::Get { id, watch } } => {
                assert_eq!(id, 42);
                assert!(watch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
