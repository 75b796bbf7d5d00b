//! Manual replay tool: reconcile a stored confirmation event against the ledger.
use anyhow::Context;
use clap::Parser;
use pledge_reconcile::{
    Reconciler,
    campaign::Campaign,
    config::Config,
    entry::{self, EntryPath},
    types::Amount,
    utils,
};
use std::{path::PathBuf, sync::Arc};

#[derive(Parser, Debug)]
#[command(name = "pledge-replay", about = "Replay a payment confirmation into the contribution ledger")]
struct Args {
    /// Confirmation event JSON file
    event: PathBuf,

    /// sled database directory (defaults to PLEDGE_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Register the campaign first if it does not exist yet: REF:GOAL_MINOR_UNITS
    #[arg(long, value_name = "REF:GOAL")]
    ensure_campaign: Option<String>,
}

fn main() -> anyhow::Result<()> {
    utils::init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    let db_path = match args.db {
        Some(path) => path,
        None => config.require_db_path()?.clone(),
    };
    let db = sled::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let reconciler = Reconciler::from_config(Arc::new(db), &config)?;

    if let Some(target) = args.ensure_campaign {
        let (campaign_ref, goal) = target
            .split_once(':')
            .context("--ensure-campaign expects REF:GOAL")?;
        let goal: u64 = goal.parse().context("campaign goal must be minor units")?;
        if reconciler.campaigns().find_by_ref(campaign_ref)?.is_none() {
            let campaign = Campaign::new(
                campaign_ref,
                campaign_ref,
                Amount::from_minor(goal),
                config.default_currency,
            );
            reconciler.campaigns().insert(&campaign)?;
        }
    }

    let body = std::fs::read(&args.event)
        .with_context(|| format!("failed to read {}", args.event.display()))?;
    let response = entry::handle_json(&reconciler, EntryPath::ManualReplay, &body);
    reconciler.flush()?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
