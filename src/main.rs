mod browser;
mod cache_db;
mod clock;
mod config;
mod dates;
mod error;
mod extract;
mod fetch;
mod invoice;
mod pagination;
mod session;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use browser::ChromeBrowser;
use cache_db::CacheStore;
use clock::{Clock, SystemClock};
use extract::Extractor;
use fetch::HttpFetcher;
use invoice::CanonicalInvoiceRecord;

/// Harvest invoices from the Fieldglass supplier portal as JSON.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[arg(long, default_value = ".config/fieldglass.toml")]
    config: PathBuf,

    /// First invoice date, YYYY-MM-DD (default: 30 days ago)
    #[arg(long)]
    from: Option<String>,

    /// Last invoice date, YYYY-MM-DD (default: today)
    #[arg(long)]
    to: Option<String>,

    /// Write the JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::Config::load(&args.config)?;
    let credentials = cfg.credentials()?;
    let extractor = Extractor::from_config(&cfg)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let today = clock.now().date();
    let from = match args.from {
        Some(from) => from,
        None => dates::format_iso(today - time::Duration::days(30)),
    };
    let to = args.to.unwrap_or_else(|| dates::format_iso(today));

    let mut cache = CacheStore::open(&cfg.cache_path, clock)?;
    let headless = cfg.browser.headless && !args.headful;
    let mut browser = ChromeBrowser::launch(headless, cfg.timing.wait_timeout())?;
    let fetcher = HttpFetcher::new(&cfg.portal.referer)?;

    let session = session::authenticate(
        &mut browser,
        &mut cache,
        &credentials,
        &cfg.selectors,
        &cfg.timing,
    )
    .await?;

    let overrides = cfg.user_overrides();
    let records: Vec<CanonicalInvoiceRecord> = extractor
        .extract_invoices(
            &mut browser,
            &fetcher,
            &mut cache,
            &credentials,
            &session,
            &from,
            &to,
        )
        .await?
        .into_iter()
        .map(|r| r.with_overrides(&overrides))
        .collect();

    let json = serde_json::to_string_pretty(&records)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), invoices = records.len(), "Wrote invoices");
        }
        None => println!("{json}"),
    }

    Ok(())
}
