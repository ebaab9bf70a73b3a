mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use corvid_mail::{MessageHandler, Notifier};
use corvid_store::gateway::{ArcGateway, Gateway};
use corvid_store::ident::UserId;
use corvid_store::login::{hash_password, GatewayLoginProvider, SlidingWindowLimiter};
use corvid_store::memory::MemoryGateway;
use corvid_store::model::{Mailbox, User};
use corvid_proto::server::Server;

use config::{read_config, Config};

#[derive(Parser, Debug)]
#[clap(author, version, about = "IMAP4rev1 mail-access server daemon")]
struct Args {
    #[clap(subcommand)]
    command: Command,

    #[clap(short, long, env = "CORVIDD_CONFIG", default_value = "corvidd.toml")]
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the IMAP server
    Daemon,
    /// Developer and operator tooling that doesn't require the daemon
    #[clap(subcommand)]
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Hash a password for a `[[users]]` entry in the config file
    HashPassword {
        #[clap(env = "CORVIDD_PASSWORD")]
        maybe_password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "corvidd=info,corvid_proto=info,corvid_mail=info,corvid_store=info");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match &args.command {
        Command::Daemon => run_daemon(&args.config_file).await,
        Command::Tools(ToolsCommand::HashPassword { maybe_password }) => {
            let password = match maybe_password {
                Some(pwd) => pwd.clone(),
                None => rpassword::prompt_password("Enter password: ")?,
            };
            println!("{}", hash_password(&password)?);
            Ok(())
        }
    }
}

async fn run_daemon(config_file: &PathBuf) -> Result<()> {
    let config = read_config(config_file.clone())
        .with_context(|| format!("failed to read config file {:?}", config_file))?;

    let memory_gateway = Arc::new(MemoryGateway::new());
    memory_gateway.ensure_indexes().await?;
    seed_users(&memory_gateway, &config).await?;
    let gateway: ArcGateway = memory_gateway;

    let login_provider = Arc::new(GatewayLoginProvider::new(gateway.clone()));
    let rate_limiter = Arc::new(SlidingWindowLimiter::default_policy());
    let notifier = Arc::new(Notifier::new(gateway.clone()));
    let handler = Arc::new(MessageHandler::new(gateway.clone(), notifier.clone(), config.imap.max_message, config.imap.max_storage));

    let tls = match &config.imap.tls {
        Some(tls) => Some(load_tls(&tls.certs, &tls.key)?),
        None => None,
    };

    let server = Server {
        bind_addr: config.imap.bind_addr,
        login_provider,
        rate_limiter,
        gateway,
        notifier,
        handler,
        tls,
    };

    let (_exit_tx, exit_rx) = watch::channel(false);
    tokio::select! {
        res = server.run(exit_rx) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}

/// Seeds every `[[users]]` entry from the config into the gateway, along
/// with an INBOX — the reference in-memory `Gateway` has no durable
/// account-creation workflow of its own, so the daemon does it at boot.
async fn seed_users(gateway: &Arc<MemoryGateway>, config: &Config) -> Result<()> {
    for entry in &config.users {
        if gateway.find_user_by_name(&entry.username).await.is_ok() {
            continue;
        }
        let user = User {
            id: UserId::gen(),
            username: entry.username.clone(),
            password_hash: entry.password_hash.clone(),
            quota: entry.quota,
            storage_used: 0,
        };
        gateway.seed_user(user.clone());

        let inbox = Mailbox {
            id: corvid_store::ident::MailboxId::gen(),
            user: user.id,
            path: "INBOX".to_string(),
            uid_validity: 1,
            uid_next: 1,
            modify_index: 1,
            subscribed: true,
            flags: Vec::new(),
            special_use: None,
        };
        gateway.insert_mailbox(inbox).await?;
    }
    Ok(())
}

fn load_tls(certs_path: &std::path::Path, key_path: &std::path::Path) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(certs_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(std::fs::File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {:?}", key_path))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
