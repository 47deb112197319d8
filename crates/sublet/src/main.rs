use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;

use sublet_core::{
    collector,
    config::Config,
    domain::ListingType,
    enrich,
    query::{self, DateWindow, ListingFilter, SortOrder},
    store::{load_json_or_default, EnrichedStore},
    verification::VerificationCodes,
};
use sublet_openai::OpenAiExtractor;
use sublet_telegram::{BotService, TelegramChatSource};

#[derive(Parser)]
#[command(name = "sublet", about = "Sublet listing aggregator for a Telegram chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull recent chat messages into the raw listing store
    Collect {
        /// How many days back to collect (default: COLLECT_DAYS)
        #[arg(short, long)]
        days: Option<i64>,
    },
    /// Enrich new raw listings and archive expired ones
    Enrich,
    /// Collect, then enrich
    Update {
        #[arg(short, long)]
        days: Option<i64>,
    },
    /// Print active listings as JSON
    Listings {
        /// renting_out, looking_for, exchange or not_listing
        #[arg(short = 't', long = "type")]
        listing_type: Option<String>,
        #[arg(short, long)]
        city: Option<String>,
        /// "DD.MM.YYYY - DD.MM.YYYY"
        #[arg(short, long)]
        dates: Option<String>,
        /// date-desc, date-asc, price-asc or date-match
        #[arg(short, long, default_value = "date-desc")]
        sort: String,
        /// Show a single listing
        #[arg(long)]
        id: Option<i64>,
        /// Group output by listing type
        #[arg(long)]
        by_type: bool,
        /// Also list posts that are not listings (review view)
        #[arg(long)]
        all: bool,
    },
    /// Run the verification-code bot until Ctrl-C
    Bot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sublet_core::logging::init("sublet")?;

    let cli = Cli::parse();
    let cfg = Config::load()?;

    match cli.command {
        Commands::Collect { days } => collect(&cfg, days).await,
        Commands::Enrich => enrich(&cfg).await,
        Commands::Update { days } => {
            collect(&cfg, days).await?;
            enrich(&cfg).await
        }
        Commands::Listings {
            listing_type,
            city,
            dates,
            sort,
            id,
            by_type,
            all,
        } => {
            let listing_type = match listing_type.as_deref() {
                Some(t) => Some(
                    ListingType::parse(t)
                        .with_context(|| format!("unknown listing type {t:?}"))?,
                ),
                None => None,
            };
            let filter = ListingFilter {
                listing_type,
                include_not_listing: all,
                city,
                dates,
            };
            listings(&cfg, filter, SortOrder::parse(&sort), id, by_type)
        }
        Commands::Bot => bot(&cfg).await,
    }
}

async fn collect(cfg: &Config, days: Option<i64>) -> anyhow::Result<()> {
    let (token, chat_id) = cfg.require_telegram()?;
    if cfg.telegram_collector_token.is_none() {
        tracing::info!(
            "collecting with TELEGRAM_BOT_TOKEN; stop `sublet bot` first or set TELEGRAM_COLLECTOR_TOKEN"
        );
    }
    let mut source = TelegramChatSource::from_token(token, chat_id);
    let days = days.unwrap_or(cfg.collect_days).max(0);

    tracing::info!("Starting data collection...");
    let report = collector::run(cfg, &mut source, days, Utc::now())
        .await
        .context("collect failed")?;
    println!(
        "Collected {} messages, {} new ({} total)",
        report.collected, report.added, report.total
    );
    Ok(())
}

async fn enrich(cfg: &Config) -> anyhow::Result<()> {
    let client = OpenAiExtractor::from_config(cfg)?;
    tracing::info!("Enriching with model {}", client.model());
    let report = enrich::run(cfg, &client).await.context("enrich failed")?;
    println!(
        "Processed {} new listings into {} records; {} active, {} newly archived, {} archived total",
        report.processed,
        report.produced,
        report.lifecycle.active,
        report.lifecycle.newly_archived,
        report.lifecycle.archive_total
    );
    Ok(())
}

fn listings(
    cfg: &Config,
    filter: ListingFilter,
    order: SortOrder,
    id: Option<i64>,
    by_type: bool,
) -> anyhow::Result<()> {
    let store: EnrichedStore = load_json_or_default(&cfg.enriched_file);
    let all = query::prepare_for_display(
        store.listings,
        cfg.recency_window,
        &cfg.media_dir,
        Utc::now(),
    );

    let out = if let Some(id) = id {
        let listing = query::find_by_id(&all, id)
            .with_context(|| format!("listing {id} not found"))?;
        json!({ "listing": listing, "processed_at": store.processed_at })
    } else {
        let window = filter.dates.as_deref().and_then(DateWindow::parse);
        let shown = query::sort(query::filter(&all, &filter), order, window);
        let listings = if by_type {
            serde_json::Value::Object(
                query::group_by_type(&shown)
                    .into_iter()
                    .map(|(t, xs)| (t.as_str().to_string(), json!(xs)))
                    .collect(),
            )
        } else {
            json!(shown)
        };
        json!({
            "listings": listings,
            "cities": query::cities(&all),
            "processed_at": store.processed_at,
        })
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn bot(cfg: &Config) -> anyhow::Result<()> {
    let token = cfg.require_bot_token()?;
    let codes = Arc::new(VerificationCodes::new(cfg.verification_code_ttl));
    let mut service = BotService::new(token, codes);

    service.start().await.context("failed to start bot")?;
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    service.stop().await?;
    Ok(())
}
