//! Cloudctl command line entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cloudctl::api::HttpApi;
use cloudctl::auth::AllowAll;
use cloudctl::cluster::register_live_node;
use cloudctl::config::StoreConfig;
use cloudctl::{CloudControl, Command, CommandOutput, Config};
use coord::EmbeddedServer;

/// Cloudctl - config set distribution and cluster topology
#[derive(Parser, Debug)]
#[command(name = "cloudctl")]
#[command(about = "Manage config sets and inspect cluster topology in the coordination store")]
struct Args {
    /// Connect string, `[host:port][/chroot]`; only local hosts are accepted
    #[arg(short = 'z', long)]
    zkhost: Option<String>,

    /// Directory of the in-process store image
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Host the store under <solr-home>/zoo_data for the duration of the command
    #[arg(long)]
    run_embedded: bool,

    /// Solr home, required by --run-embedded and bootstrap
    #[arg(short = 's', long)]
    solr_home: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Upload and link the configs of all cores under --solr-home
    Bootstrap,
    /// Upload a local config directory as a config set
    Upconfig {
        #[arg(short = 'd', long)]
        confdir: PathBuf,
        #[arg(short = 'n', long)]
        confname: String,
    },
    /// Download a config set into a local directory
    Downconfig {
        #[arg(short = 'd', long)]
        confdir: PathBuf,
        #[arg(short = 'n', long)]
        confname: String,
    },
    /// Link a collection to a config set
    Linkconfig {
        #[arg(short = 'c', long)]
        collection: String,
        #[arg(short = 'n', long)]
        confname: String,
    },
    Makepath { path: String },
    Put { path: String, data: String },
    Putfile { path: String, file: PathBuf },
    Get { path: String },
    Getfile { path: String, file: PathBuf },
    /// Print the whole tree
    List,
    /// Recursively delete a path
    Clear { path: String },
    /// Print the active cores, optionally only those on one host
    Getcollections {
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Run the replica state machine and the HTTP API until interrupted
    Serve {
        /// HTTP API listen address
        #[arg(long)]
        http_addr: Option<String>,
        /// Announce this node as live while serving
        #[arg(long)]
        node_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let mut overrides = Config::default();
    if let Some(zkhost) = &args.zkhost {
        overrides.store.connect_string = zkhost.clone();
    }
    overrides.store.data_dir = args.store_dir.clone();
    if let Some(level) = &args.log_level {
        overrides.log.level = level.clone();
    }
    if let Cmd::Serve {
        http_addr: Some(addr),
        ..
    } = &args.command
    {
        overrides.http.addr = addr.clone();
    }
    config.merge(overrides);

    // Initialize logging
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    config.store.check_local_hosts()?;
    let data_dir = data_dir(&args, &config.store)?;
    info!("Coordination store data dir: {:?}", data_dir);

    EmbeddedServer::scoped(&data_dir, |store| async move {
        let ctl = Arc::new(
            CloudControl::connect(Arc::new(store.connect()), &config, Arc::new(AllowAll)).await?,
        );
        let result = match args.command {
            Cmd::Serve { node_name, .. } => serve(ctl.clone(), &config, node_name).await,
            command => {
                let command = to_command(command, args.solr_home.clone())?;
                let output = ctl.execute(command).await?;
                report(&output);
                Ok(())
            }
        };
        ctl.close().await;
        result
    })
    .await
}

fn data_dir(args: &Args, store: &StoreConfig) -> anyhow::Result<PathBuf> {
    if args.run_embedded {
        let Some(home) = &args.solr_home else {
            bail!("--solr-home is required for --run-embedded");
        };
        return Ok(home.join("zoo_data"));
    }
    Ok(store
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./zoo_data")))
}

fn to_command(cmd: Cmd, solr_home: Option<PathBuf>) -> anyhow::Result<Command> {
    Ok(match cmd {
        Cmd::Bootstrap => match solr_home {
            Some(solr_home) => Command::Bootstrap { solr_home },
            None => bail!("--solr-home is required for bootstrap"),
        },
        Cmd::Upconfig { confdir, confname } => Command::UpConfig {
            conf_dir: confdir,
            conf_name: confname,
        },
        Cmd::Downconfig { confdir, confname } => Command::DownConfig {
            conf_name: confname,
            conf_dir: confdir,
        },
        Cmd::Linkconfig {
            collection,
            confname,
        } => Command::LinkConfig {
            collection,
            conf_name: confname,
        },
        Cmd::Makepath { path } => Command::MakePath { path },
        Cmd::Put { path, data } => Command::Put { path, data },
        Cmd::Putfile { path, file } => Command::PutFile { path, file },
        Cmd::Get { path } => Command::Get { path },
        Cmd::Getfile { path, file } => Command::GetFile { path, file },
        Cmd::List => Command::List,
        Cmd::Clear { path } => Command::Clear { path },
        Cmd::Getcollections { hostname } => Command::GetCollections { host: hostname },
        Cmd::Serve { .. } => bail!("serve is not an administrative command"),
    })
}

fn report(output: &CommandOutput) {
    match output {
        CommandOutput::Sync { report } => info!(
            "{} directories, {} files written, {} unchanged, {} skipped",
            report.directories,
            report.files_written,
            report.files_unchanged,
            report.skipped.len()
        ),
        CommandOutput::Bootstrap { report } => info!(
            "Bootstrap: uploaded {:?}, linked {:?}, skipped {:?}",
            report.uploaded, report.linked, report.skipped
        ),
        other => print!("{}", other),
    }
}

async fn serve(
    ctl: Arc<CloudControl>,
    config: &Config,
    node_name: Option<String>,
) -> anyhow::Result<()> {
    if let Some(node_name) = &node_name {
        register_live_node(ctl.client(), node_name).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state_machine = ctl.start_state_machine(shutdown_rx.clone());

    let app = HttpApi::new(ctl.clone()).router();
    let listener = tokio::net::TcpListener::bind(&config.http.addr).await?;
    info!("HTTP API listening on {}", config.http.addr);

    let mut http_shutdown = shutdown_rx;
    let http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown_tx.send_replace(true);

    state_machine.await??;
    http.await??;
    Ok(())
}
