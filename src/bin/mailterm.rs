use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Read;
use std::path::PathBuf;

use mailterm::auth::token_store;
use mailterm::config::{self, load_config};
use mailterm::domain::email::Service;
use mailterm::render;
use mailterm::session::Session;
use mailterm::terminal::run_tui;

#[derive(Parser)]
#[command(name = "mailterm")]
#[command(about = "Terminal mail reader for Gmail, Microsoft Graph and IMAP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the TUI (default)
    Tui {
        /// Backend to start with instead of `selected_service`
        #[arg(long)]
        service: Option<Service>,
    },

    /// Render an .eml file (or `-` for stdin) the way the TUI shows it
    Render { path: PathBuf },

    /// Store an OAuth client secret in the keyring (read from stdin)
    SetClientSecret {
        #[arg(long)]
        service: Service,
        #[arg(long)]
        client_id: String,
    },

    /// Store an IMAP password in the keyring (read from stdin)
    SetImapPassword {
        #[arg(long)]
        username: String,
    },
}

fn init_logging(to_file: bool) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if to_file {
        // keep log lines off the alternate screen
        let path = config::log_path()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn read_secret(prompt: &str) -> Result<String> {
    eprintln!("{prompt} (end with Ctrl-D):");
    let mut secret = String::new();
    std::io::stdin().read_to_string(&mut secret)?;
    let secret = secret.trim().to_string();
    if secret.is_empty() {
        bail!("nothing read from stdin");
    }
    Ok(secret)
}

fn read_message(path: &PathBuf) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut raw = Vec::new();
        std::io::stdin().read_to_end(&mut raw)?;
        return Ok(raw);
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.cmd.unwrap_or(Command::Tui { service: None });

    init_logging(matches!(cmd, Command::Tui { .. }))?;

    match cmd {
        Command::SetClientSecret { service, client_id } => {
            if service == Service::Imap {
                bail!("IMAP has no OAuth client; use set-imap-password or xoauth2 with [gmail]");
            }
            let secret = read_secret("Paste client secret")?;
            token_store::save_client_secret(service, &client_id, &secret)?;
            println!("Saved {service} client secret for client_id {client_id}");
            Ok(())
        }

        Command::SetImapPassword { username } => {
            let password = read_secret("Paste IMAP password")?;
            token_store::save_imap_password(&username, &password)?;
            println!("Saved IMAP password for {username}");
            Ok(())
        }

        Command::Render { path } => {
            let raw = read_message(&path)?;
            let rendered = render::decode(&raw)
                .map_err(|e| anyhow!("Error displaying message: {e}"))?;
            println!("{rendered}");
            Ok(())
        }

        Command::Tui { service } => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e:#}"))?;
            let service = service.unwrap_or(cfg.selected_service);
            let mut session = Session::connect(cfg, service)?;
            run_tui(&mut session)
        }
    }
}
