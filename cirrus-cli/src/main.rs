//! Cirrus CLI — headless presence client.
//!
//! Connects to a collaboration backend (or simulates one when it cannot be
//! reached), joins the requested files and folders, logs every event and
//! prints presence and sync snapshots as JSON.

use clap::{Parser, Subcommand};
use log::info;
use std::time::Duration;

use cirrus_collab::{
    EventKind, LocalUser, MemoryTransport, ReconnectPolicy, Resource, Session, SessionConfig,
    Subscription,
};

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(version, about = "Real-time presence client for Cirrus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Collaboration backend URL
    #[arg(long, global = true, env = "CIRRUS_COLLAB_URL", default_value = "ws://127.0.0.1:9090/collab")]
    server: String,

    /// Local user id (random when omitted)
    #[arg(long, global = true)]
    user_id: Option<String>,

    /// Display name shown to other collaborators
    #[arg(long, global = true, default_value = "Cirrus CLI")]
    user_name: String,

    /// Bearer token forwarded to the backend
    #[arg(long, global = true, env = "CIRRUS_TOKEN")]
    token: Option<String>,

    /// Retries before falling back to simulation
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,

    /// First retry delay in milliseconds; doubles on every retry
    #[arg(long, global = true, default_value_t = 1000)]
    base_delay_ms: u64,

    /// Skip the backend and run in simulation mode
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join resources and log collaborator activity
    Watch {
        /// Files to join
        #[arg(long = "file", value_name = "ID")]
        files: Vec<String>,

        /// Folders to join
        #[arg(long = "folder", value_name = "ID")]
        folders: Vec<String>,

        /// How long to stay connected, in seconds
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },

    /// Request a sync for each file and print the resulting statuses
    Sync {
        /// Files to sync
        #[arg(required = true)]
        files: Vec<String>,

        /// How long to wait for statuses, in seconds
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let session = start_session(&cli);
    let _log = log_all_events(&session);

    match cli.command {
        Commands::Watch { files, folders, seconds } => {
            let resources: Vec<Resource> = files
                .into_iter()
                .map(Resource::file)
                .chain(folders.into_iter().map(Resource::folder))
                .collect();
            watch(&session, &resources, Duration::from_secs(seconds)).await?;
        }
        Commands::Sync { files, wait } => {
            sync(&session, &files, Duration::from_secs(wait)).await?;
        }
    }

    session.shutdown().await;
    Ok(())
}

fn start_session(cli: &Cli) -> Session {
    let user_id = cli
        .user_id
        .clone()
        .unwrap_or_else(|| format!("cli-{}", std::process::id()));

    let mut config = SessionConfig {
        server_url: cli.server.clone(),
        user: LocalUser::new(user_id, cli.user_name.clone()),
        token: cli.token.clone(),
        reconnect: ReconnectPolicy {
            max_attempts: cli.max_attempts,
            base_delay: Duration::from_millis(cli.base_delay_ms),
            ..ReconnectPolicy::default()
        },
        ..SessionConfig::default()
    };

    if cli.offline {
        info!("Offline: running in simulation mode");
        config.reconnect.max_attempts = 0;
        return Session::start(config, MemoryTransport::unreachable());
    }
    Session::connect(config)
}

fn log_all_events(session: &Session) -> Vec<Subscription> {
    EventKind::ALL
        .iter()
        .map(|&kind| {
            session.subscribe(kind, move |event| match event.encode() {
                Ok(json) => info!("[{kind}] {json}"),
                Err(e) => log::warn!("[{kind}] unprintable event: {e}"),
            })
        })
        .collect()
}

async fn watch(
    session: &Session,
    resources: &[Resource],
    duration: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    for resource in resources {
        session.join_resource(resource.clone());
    }

    let deadline = tokio::time::Instant::now() + duration;
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => print_presence(session, resources)?,
        }
    }

    for resource in resources {
        session.leave_resource(resource.clone());
    }
    print_presence(session, resources)?;
    Ok(())
}

async fn sync(
    session: &Session,
    files: &[String],
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    for file in files {
        session.request_sync(file);
    }

    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if files.iter().all(|f| session.sync_status(f).is_some()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("{}", serde_json::to_string_pretty(&session.all_sync_statuses())?);
    Ok(())
}

fn print_presence(session: &Session, resources: &[Resource]) -> Result<(), Box<dyn std::error::Error>> {
    let connection = session.connection();
    println!("connection: {}", serde_json::to_string(&connection)?);
    for resource in resources {
        let members = session.presence(&resource.id);
        println!("{resource}: {}", serde_json::to_string(&members)?);
    }
    Ok(())
}
