//! ingest-cli：经中继网关提交入库任务、流式提问
//!
//! 用法:
//!   ingest-cli ingest --file data.csv
//!   ingest-cli ingest --url https://example.com/data.csv
//!   ingest-cli chat "这份数据讲了什么？"
//!
//! Ctrl+C 取消当前上传 / 流读取，运行以 cancelled 结束。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ingest_relay::client::{ChatSession, HttpJobBackend, IngestOrchestrator, IngestRequest, RunStage};
use ingest_relay::config::{load_config, AppConfig};
use ingest_relay::core::ShutdownManager;
use ingest_relay::observability;
use ingest_relay::progress::RunStatus;

#[derive(Parser)]
#[command(name = "ingest-cli")]
#[command(about = "Submit documents for ingestion and ask questions through the relay gateway")]
#[command(version)]
struct Cli {
    /// 配置文件路径（缺省时读 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 入库本地文件（先上传）或远程 URL
    Ingest {
        /// 本地文件，优先于 --url
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 可被后端直接拉取的数据地址
        #[arg(short, long)]
        url: Option<String>,

        /// 覆盖配置中的租户
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// 流式提问
    Chat {
        query: String,

        #[arg(short, long)]
        tenant: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_with_default("warn");
    let cli = Cli::parse();
    let config = load_config(cli.config).context("Failed to load config")?;

    let backend = Arc::new(connect(&config).await?);
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    match cli.command {
        Commands::Ingest { file, url, tenant } => {
            let tenant = tenant.unwrap_or_else(|| config.client.tenant_id.clone());
            let orchestrator = IngestOrchestrator::new(backend, tenant);
            shutdown.cancel_on_shutdown(orchestrator.cancel_handle());

            let mut updates = orchestrator.subscribe();
            let printer = tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    match snapshot.stage {
                        RunStage::Uploading => println!("upload {:>3}%", snapshot.transfer.percent),
                        RunStage::Streaming => println!(
                            "{:>3}% {} {}",
                            snapshot.progress.percent, snapshot.progress.phase_label, snapshot.progress.detail
                        ),
                        _ => {}
                    }
                }
            });

            let state = orchestrator.run(IngestRequest { file, url }).await?;
            drop(orchestrator);
            let _ = printer.await;

            match state.status {
                RunStatus::Complete => println!("complete ({}%)", state.percent),
                RunStatus::Cancelled => println!("cancelled at {}%", state.percent),
                RunStatus::Error => bail!("ingest failed: {}", state.detail),
                other => println!("stream ended while {:?} ({}%)", other, state.percent),
            }
        }
        Commands::Chat { query, tenant } => {
            let tenant = tenant.unwrap_or_else(|| config.client.tenant_id.clone());
            let session = ChatSession::new(backend, tenant);
            shutdown.cancel_on_shutdown(session.cancel_handle());

            let reply = session
                .ask(&query, |text| {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                })
                .await?;
            println!();
            if reply.cancelled {
                eprintln!("(cancelled)");
            }
        }
    }

    Ok(())
}

/// 使用预置会话 Cookie，否则以 [auth] 凭据登录
async fn connect(config: &AppConfig) -> Result<HttpJobBackend> {
    let backend = HttpJobBackend::new(&config.client.gateway_url).context("Failed to build HTTP client")?;
    if let Some(value) = &config.client.session_cookie {
        return Ok(backend.with_session_cookie(&config.auth.cookie_name, value));
    }
    let mut backend = backend;
    backend
        .login(&config.auth.username, &config.auth.password)
        .await
        .with_context(|| format!("Login to {} failed", config.client.gateway_url))?;
    Ok(backend)
}
