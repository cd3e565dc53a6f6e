use std::fs;
use std::sync::Arc;

use anyhow::bail;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use satchel::archive;
use satchel::auth::PasswordHasherConfig;
use satchel::config::ServerConfig;
use satchel::server::wiki::WikiAssets;
use satchel::server::{AppState, create_router};
use satchel::store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "satchel")]
#[command(about = "A tiddler synchronization server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "8080")]
        port: u16,

        /// Data directory for the database, attachments, and plugins
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },

    /// Import an archive directory into the store
    LoadArchive {
        /// Archive directory to read
        archive_dir: String,

        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },

    /// Export every bag and recipe to an archive directory
    SaveArchive {
        /// Archive directory to write
        archive_dir: String,

        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database and admin user)
    Init {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Username for the initial admin user
        #[arg(long, default_value = "admin")]
        username: String,
    },
}

fn open_store(data_dir: &str) -> anyhow::Result<(ServerConfig, SqliteStore)> {
    let config = ServerConfig {
        data_dir: data_dir.into(),
        ..ServerConfig::default()
    };
    fs::create_dir_all(&config.data_dir)?;
    let store = SqliteStore::new(&config.db_path())?;
    store.initialize()?;
    Ok((config, store))
}

fn generate_password() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn run_init(data_dir: String, username: String) -> anyhow::Result<()> {
    let (_, store) = open_store(&data_dir)?;

    if store.has_admin_user()? {
        bail!("Server already initialized: an admin user exists.");
    }

    let password = generate_password();
    let hash = PasswordHasherConfig::new().hash(&password)?;
    let user = store.create_user(&username, None, &hash)?;

    let admin_role = store
        .get_role_by_name("ADMIN")?
        .ok_or_else(|| anyhow::anyhow!("reserved ADMIN role missing after initialize"))?;
    store.set_user_roles(user.id, &[admin_role.id])?;

    println!();
    println!("========================================");
    println!("Created admin user '{username}' with password");
    println!("(save this, it won't be shown again):");
    println!();
    println!("  {password}");
    println!();
    println!("========================================");
    println!();

    Ok(())
}

async fn run_serve(host: String, port: u16, data_dir: String) -> anyhow::Result<()> {
    let (mut config, store) = open_store(&data_dir)?;
    config.host = host;
    config.port = port;

    if !store.has_admin_user()? {
        bail!("Server not initialized. Run 'satchel admin init' first to create the admin user.");
    }

    let wiki = WikiAssets::load(&config.plugins_dir())?;
    if !wiki.plugins.is_empty() {
        info!("Loaded {} plugin bundle(s)", wiki.plugins.len());
    }

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(Arc::new(store), config, wiki));
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("satchel=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir, username } => {
                run_init(data_dir, username)?;
            }
        },
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            run_serve(host, port, data_dir).await?;
        }
        Commands::LoadArchive {
            archive_dir,
            data_dir,
        } => {
            let (_, store) = open_store(&data_dir)?;
            archive::load_archive(&store, std::path::Path::new(&archive_dir))?;
            info!("Archive loaded from {archive_dir}");
        }
        Commands::SaveArchive {
            archive_dir,
            data_dir,
        } => {
            let (_, store) = open_store(&data_dir)?;
            fs::create_dir_all(&archive_dir)?;
            archive::save_archive(&store, std::path::Path::new(&archive_dir))?;
            info!("Archive saved to {archive_dir}");
        }
    }

    Ok(())
}
