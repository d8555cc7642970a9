use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use twget_core::{Authenticator, CredentialPrompt};

#[derive(Parser)]
#[command(name = "twget", version, about = "Archive photos and videos posted by the given accounts")]
struct Cli {
    /// Accounts to archive
    #[arg(required = true)]
    accounts: Vec<String>,

    /// Path to output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Search tweets decrementally (older than the oldest archived file)
    #[arg(long)]
    decremental: bool,

    /// Search tweets incrementally (since the newest archived file)
    #[arg(long)]
    incremental: bool,

    /// Filter tweets since this date (YYYY-MM-DD)
    #[arg(long, default_value = "")]
    since: String,

    /// Filter tweets until this date (YYYY-MM-DD)
    #[arg(long, default_value = "")]
    until: String,

    /// Limit number of tweets to search
    #[arg(long, default_value_t = twget_core::DEFAULT_LIMIT)]
    limit: usize,

    /// JSON-lines export of tweet records to search
    #[arg(long)]
    feed: PathBuf,

    /// Directory holding the saved session (default: <config dir>/twget)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn username(&mut self) -> io::Result<String> {
        eprint!("username: ");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn password(&mut self) -> io::Result<String> {
        rpassword::prompt_password("password: ")
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let mode = twget_core::RunMode::from_flags(cli.decremental, cli.incremental, &cli.since, &cli.until)?;
    let options = twget_core::RunOptions {
        output: cli.output,
        mode,
        limit: cli.limit,
    };

    let store = match cli.config_dir {
        Some(dir) => twget_core::SessionStore::at(dir),
        None => twget_core::SessionStore::default_location().context("cannot determine config directory")?,
    };
    let mut search = twget_core::FeedSearch::new(cli.feed);
    twget_core::establish_session(&mut search, &store, &mut TerminalPrompt).context("login failed")?;

    let transport = twget_core::HttpTransport::new(&search.cookies())
        .map_err(|e| anyhow::anyhow!(e))
        .context("cannot create HTTP client")?;

    let reports = twget_core::process_accounts(&options, &cli.accounts, &mut search, &transport)?;

    let downloaded: u64 = reports.iter().map(|r| r.downloaded).sum();
    let skipped: u64 = reports.iter().map(|r| r.already_archived).sum();
    tracing::info!(
        "Done! {} account(s), {} files downloaded, {} already archived ({:.2}s)",
        reports.len(),
        downloaded,
        skipped,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
