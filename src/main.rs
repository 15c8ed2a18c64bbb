// sshdeck - 无界面前端
// 应用入口

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

use sshdeck::models::mask_host;
use sshdeck::models::sftp::format_size;
use sshdeck::services::storage;
use sshdeck::{
    ConfigStore, Connection, CoreEvent, CoreSettings, EventSink, LatencyProbe, SessionEvent,
    SessionRegistry, SftpPane, SystemInfoProbe, TransferSession,
};

/// sshdeck - 管理 SSH/SFTP 会话
#[derive(Debug, Parser)]
#[command(name = "sshdeck", version, about = "SSH/SFTP session manager")]
struct Cli {
    /// Server list file (defaults to the user config directory)
    #[arg(long = "store", value_name = "FILE")]
    store: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long = "settings", value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List saved servers
    List {
        /// Measure TCP latency to every server
        #[arg(long)]
        ping: bool,
    },
    /// Export all servers as a JSON array
    Export { path: PathBuf },
    /// Import servers from a JSON array, skipping known ids
    Import { path: PathBuf },
    /// Measure TCP connect latency
    Ping { id: String },
    /// Show remote system information
    Info { id: String },
    /// Run a command interactively (stdin lines are forwarded, Ctrl-C interrupts)
    Exec { id: String, command: String },
    /// List a remote directory
    Ls {
        id: String,
        path: Option<String>,
        /// Include entries whose names start with '.'
        #[arg(short, long)]
        all: bool,
    },
    /// Download a remote file
    Get {
        id: String,
        remote: String,
        local: PathBuf,
    },
    /// Upload a local file
    Put {
        id: String,
        local: PathBuf,
        remote: String,
    },
}

fn main() -> Result<()> {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug sshdeck list
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false) // 不显示 target（模块路径）
        .init();

    let cli = Cli::parse();

    // 创建多线程 Tokio 运行时
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ssh-worker")
        .build()
        .context("Failed to create SSH Tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut store = match &cli.store {
        Some(path) => ConfigStore::open(path)?,
        None => ConfigStore::open_default()?,
    };
    let settings = match &cli.settings {
        Some(path) => storage::load_settings_from(path)?,
        None => storage::load_settings().unwrap_or_default(),
    };

    match cli.command {
        Command::List { ping } => list(&store, &settings, ping).await,
        Command::Export { path } => {
            let count = store.export_to(&path)?;
            println!("Exported {} servers to {}", count, path.display());
            Ok(())
        }
        Command::Import { path } => {
            let summary = store.import_from(&path)?;
            println!(
                "Imported {} new servers ({} in file)",
                summary.added, summary.read
            );
            Ok(())
        }
        Command::Ping { id } => {
            let server = find(&store, &id)?;
            let latency = LatencyProbe::new(&server.id, &server.host, server.port)
                .with_timeout(settings.probe.latency_timeout())
                .measure()
                .await;
            print_latency(server.display_name(), latency);
            Ok(())
        }
        Command::Info { id } => {
            let (connection, _events) = connect(&store, &id, &settings).await?;
            let info = SystemInfoProbe::new(connection.clone())
                .with_timeout(settings.connection.command_timeout())
                .collect()
                .await;
            println!("Host:   {}", connection.hostname());
            if let Some(fingerprint) = connection.host_key_fingerprint() {
                println!("Key:    {}", fingerprint);
            }
            println!("CPU:    {}", info.cpu);
            println!(
                "Memory: {}/{} ({})",
                info.memory_used, info.memory_total, info.memory_percent
            );
            println!(
                "Disk:   {}/{} ({})",
                info.disk_used, info.disk_total, info.disk_percent
            );
            println!("OS:     {}", info.os);
            println!("Uptime: {}", info.uptime);
            connection.disconnect().await;
            Ok(())
        }
        Command::Exec { id, command } => exec(&store, &id, &command, settings).await,
        Command::Ls { id, path, all } => {
            let (connection, _events) = connect(&store, &id, &settings).await?;
            let path = match path {
                Some(path) => path,
                None => connection.home_dir().await,
            };
            let pane = SftpPane::new(connection.clone(), path.clone());
            let listed = pane.load_directory(&path).await;
            connection.disconnect().await;

            let Some(entries) = listed else {
                bail!("Cannot list {}", path);
            };
            for entry in entries.iter().filter(|e| all || !e.is_hidden()) {
                println!(
                    "{:<6} {:>10}  {}",
                    entry.kind_label(),
                    entry.display_size(),
                    entry.name
                );
            }
            Ok(())
        }
        Command::Get { id, remote, local } => {
            let (connection, events) = connect(&store, &id, &settings).await?;
            let request = sshdeck::models::TransferRequest::download(remote, local);
            let transfer = TransferSession::start(connection.clone(), request, &Handle::current());
            finish_transfer(&connection, transfer, events).await
        }
        Command::Put { id, local, remote } => {
            let (connection, events) = connect(&store, &id, &settings).await?;
            let request = sshdeck::models::TransferRequest::upload(local, remote);
            let transfer = TransferSession::start(connection.clone(), request, &Handle::current());
            finish_transfer(&connection, transfer, events).await
        }
    }
}

fn find<'a>(store: &'a ConfigStore, id: &str) -> Result<&'a sshdeck::ConnectionConfig> {
    store
        .get(id)
        .with_context(|| format!("No server with id {}", id))
}

fn print_latency(name: &str, latency: i64) {
    if latency < 0 {
        println!("{}: timeout", name);
    } else {
        println!("{}: {} ms", name, latency);
    }
}

async fn list(store: &ConfigStore, settings: &CoreSettings, ping: bool) -> Result<()> {
    if store.all().is_empty() {
        println!("No servers saved in {}", store.path().display());
        return Ok(());
    }

    let latencies: Vec<Option<i64>> = if ping {
        let probes = store.all().iter().map(|s| {
            LatencyProbe::new(&s.id, &s.host, s.port).with_timeout(settings.probe.latency_timeout())
        });
        let measured = futures::future::join_all(probes.map(|p| async move { p.measure().await })).await;
        measured.into_iter().map(Some).collect()
    } else {
        vec![None; store.all().len()]
    };

    for (server, latency) in store.all().iter().zip(latencies) {
        let latency = match latency {
            Some(ms) if ms >= 0 => format!("{} ms", ms),
            Some(_) => "timeout".to_string(),
            None => String::new(),
        };
        println!(
            "{}  {:<20} {}@{:<24} {}",
            server.id,
            server.display_name(),
            server.username,
            mask_host(&server.host, server.port),
            latency
        );
    }
    Ok(())
}

/// 建立一条独立连接
async fn connect(
    store: &ConfigStore,
    id: &str,
    settings: &CoreSettings,
) -> Result<(Arc<Connection>, UnboundedReceiver<CoreEvent>)> {
    let server = find(store, id)?.clone();
    let (sink, events) = EventSink::channel(server.id.clone());
    let connection = Connection::new(server, settings.clone(), sink);
    if let Err(e) = connection.connect().await {
        bail!(connection.describe_error(&e));
    }
    Ok((connection, events))
}

async fn finish_transfer(
    connection: &Connection,
    transfer: TransferSession,
    mut events: UnboundedReceiver<CoreEvent>,
) -> Result<()> {
    let name = transfer.request().file_name();
    let outcome = loop {
        tokio::select! {
            outcome = transfer.wait() => break outcome,
            Some(event) = events.recv() => {
                if let CoreEvent::Session { event: SessionEvent::TransferProgress { .. }, .. } = event {
                    let progress = transfer.progress();
                    eprint!(
                        "\r{}: {:.1}% {}/s",
                        name,
                        progress.percentage(),
                        format_size(progress.speed_bytes_per_sec())
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => transfer.cancel(),
        }
    };
    eprintln!();
    connection.disconnect().await;

    if outcome.success {
        println!("{}: {}", name, outcome.message);
        Ok(())
    } else {
        bail!("{}: {}", name, outcome.message)
    }
}

/// 通过会话注册表运行交互命令
async fn exec(store: &ConfigStore, id: &str, command: &str, settings: CoreSettings) -> Result<()> {
    let server = find(store, id)?.clone();
    let (registry, mut events) = SessionRegistry::new(Handle::current(), settings);
    let index = registry.add_session(server, None);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut started = false;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    CoreEvent::AllSessionsClosed => break,
                    CoreEvent::Session { event, .. } => match event {
                        SessionEvent::Connected if !started => {
                            started = true;
                            registry.execute_command(index, command);
                        }
                        SessionEvent::Error(message) => {
                            eprintln!("{}", message);
                            // 连接成功之前的错误只可能来自连接失败
                            if !started {
                                registry.close_session(index).await;
                                bail!("Connection failed");
                            }
                        }
                        SessionEvent::Output { text, is_error } => {
                            if is_error {
                                eprintln!("{}", text);
                            } else {
                                println!("{}", text);
                            }
                        }
                        SessionEvent::InputRequested => eprintln!("(input requested)"),
                        SessionEvent::CommandFinished => {
                            registry.close_session(index).await;
                        }
                        _ => {}
                    },
                }
            }
            line = stdin.next_line(), if started && stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        registry.send_input(index, &format!("{}\n", line));
                    }
                    // 标准输入结束后不再读取
                    _ => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if !registry.interrupt(index) {
                    registry.close_session(index).await;
                }
            }
        }
    }
    Ok(())
}
