mod action;
mod config;
mod context;
mod inbox;
mod item;
mod loader;
mod matcher;
mod pattern;
mod queue;
mod site;
mod store;
mod template;
#[cfg(test)]
mod testutil;
mod user;

use crate::config::Settings;
use crate::context::Context;
use crate::inbox::process_messages;
use crate::loader::load_rule_document;
use crate::queue::{check_queue, Queue, RuleSets};
use crate::site::http::HttpSite;
use crate::site::{SiteClient as _, SiteError};
use crate::store::{CommunityConfig, Store, YamlStore};
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info};
use url::Url;

/// How long to wait before retrying a failed startup or cycle.
const BACKOFF: Duration = Duration::from_secs(30);
/// Pause between poll cycles.
const CYCLE_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config_dir = &cli.config_dir;

    match cli.command {
        Command::Run => run(config_dir).await,
        Command::Check { ref file } => check(config_dir, file).await,
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root config directory.
    #[arg(short, long)]
    config_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the moderation loop.
    Run,
    /// Validate a rule document file without touching the site.
    Check {
        /// Path to a YAML rule document.
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Offline rule linting. Standards are resolved from the local store, so
/// `standard:` references validate the same way they would on ingest.
async fn check(config_dir: &PathBuf, file: &PathBuf) -> Result<()> {
    let document = std::fs::read_to_string(file)
        .with_context(|| format!("Couldn't read {file}", file = file.display()))?;

    let standards = crate::pattern::standards::StandardsCache::new();
    if let Ok(settings) = Settings::load(config_dir) {
        if let Ok(store) = YamlStore::open(&settings.state_dir) {
            standards.refresh(store.standards().await?).await;
        }
    }

    let conditions = load_rule_document(&document, &standards)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!(
        "{count} conditions OK",
        count = conditions.len()
    );
    Ok(())
}

async fn run(config_dir: &PathBuf) -> Result<()> {
    // fatal startup errors are retried until login succeeds
    let (ctx, mut moderated) = loop {
        match startup(config_dir).await {
            Ok(state) => break state,
            Err(e) => {
                error!("Startup failed: {e:#}");
                tokio::time::sleep(BACKOFF).await;
            }
        }
    };

    ctx.standards.refresh(ctx.store.standards().await?).await;
    let mut communities = enabled_communities(&ctx, &moderated).await?;
    let mut rule_sets = build_rule_sets(&ctx, &communities).await;

    let reports_period = time::Duration::minutes(ctx.settings.reports_check_period_mins);
    let mut last_reports_check = OffsetDateTime::UNIX_EPOCH;

    loop {
        let result = run_cycle(
            &ctx,
            &mut moderated,
            &mut communities,
            &mut rule_sets,
            reports_period,
            &mut last_reports_check,
        )
        .await;

        match result {
            Ok(()) => {}
            Err(e)
                if e.downcast_ref::<SiteError>()
                    .map(SiteError::is_forbidden)
                    .unwrap_or(false) =>
            {
                info!("Re-initializing due to permissions error: {e:#}");
                match ctx.site.moderated_communities().await {
                    Ok(listing) => {
                        moderated = listing.into_iter().map(|name| name.to_lowercase()).collect();
                        communities = enabled_communities(&ctx, &moderated).await?;
                        rule_sets = build_rule_sets(&ctx, &communities).await;
                    }
                    Err(e) => error!("Couldn't re-discover moderated communities: {e}"),
                }
            }
            Err(e) => {
                error!("Cycle failed: {e:#}");
                tokio::time::sleep(BACKOFF).await;
            }
        }

        info!("Looping");
        tokio::time::sleep(CYCLE_DELAY).await;
    }
}

async fn startup(config_dir: &PathBuf) -> Result<(Context, HashSet<String>)> {
    let settings = Settings::load(config_dir)?;
    let base = Url::parse(&settings.base_url)?;
    let site = Arc::new(HttpSite::new(
        base,
        settings.username.clone(),
        settings.token.clone(),
    )?);
    let store = Arc::new(YamlStore::open(&settings.state_dir)?);

    info!(
        "Logging in as {username}",
        username = settings.username
    );
    // also serves as the login check
    let moderated: HashSet<String> = site
        .moderated_communities()
        .await?
        .into_iter()
        .map(|name| name.to_lowercase())
        .collect();
    info!(
        "Moderating {count} communities",
        count = moderated.len()
    );

    let ctx = Context::new(config_dir.clone(), settings, site, store);
    Ok((ctx, moderated))
}

/// Enabled communities the bot still moderates.
async fn enabled_communities(
    ctx: &Context,
    moderated: &HashSet<String>,
) -> Result<HashMap<String, CommunityConfig>> {
    let mut communities = HashMap::new();
    for config in ctx.store.communities().await? {
        let name = config.name.to_lowercase();
        if config.enabled && moderated.contains(&name) {
            communities.insert(name, config);
        }
    }
    Ok(communities)
}

/// Compile every community's stored rule document. A document that no longer
/// compiles (e.g. a standard was deleted out from under it) keeps that
/// community unpublished until its next wiki update.
async fn build_rule_sets(ctx: &Context, communities: &HashMap<String, CommunityConfig>) -> RuleSets {
    let mut rule_sets = RuleSets::default();
    for (name, config) in communities {
        if config.conditions_yaml.is_empty() {
            continue;
        }
        match load_rule_document(&config.conditions_yaml, &ctx.standards).await {
            Ok(conditions) => rule_sets.publish(name, conditions),
            Err(e) => error!("Couldn't compile stored rules for {name}: {e}"),
        }
    }
    rule_sets
}

async fn run_cycle(
    ctx: &Context,
    moderated: &mut HashSet<String>,
    communities: &mut HashMap<String, CommunityConfig>,
    rule_sets: &mut RuleSets,
    reports_period: time::Duration,
    last_reports_check: &mut OffsetDateTime,
) -> Result<()> {
    // pick up store-side changes and standards edits
    *communities = enabled_communities(ctx, moderated).await?;
    if ctx.standards.refresh(ctx.store.standards().await?).await {
        info!("Standard conditions changed, rebuilding all rule sets");
        *rule_sets = build_rule_sets(ctx, communities).await;
    } else {
        // communities synced while disabled get their rules published once
        // they show up here
        for (name, config) in communities.iter() {
            if rule_sets.contains(name) || config.conditions_yaml.is_empty() {
                continue;
            }
            match load_rule_document(&config.conditions_yaml, &ctx.standards).await {
                Ok(conditions) => rule_sets.publish(name, conditions),
                Err(e) => error!("Couldn't compile stored rules for {name}: {e}"),
            }
        }
    }

    let now = OffsetDateTime::now_utc();
    if now - *last_reports_check >= reports_period {
        *last_reports_check = now;
        check_queue(ctx, Queue::Report, communities, rule_sets).await?;
    }

    check_queue(ctx, Queue::Spam, communities, rule_sets).await?;
    check_queue(ctx, Queue::Submission, communities, rule_sets).await?;
    check_queue(ctx, Queue::Comment, communities, rule_sets).await?;

    let outcome = process_messages(ctx).await?;
    if outcome.standards_updated {
        info!("Standards updated; rule sets rebuild next cycle");
    }
    if !outcome.invited.is_empty() {
        *moderated = ctx
            .site
            .moderated_communities()
            .await?
            .into_iter()
            .map(|name| name.to_lowercase())
            .collect();
    }
    for (community, conditions) in outcome.updated {
        if let Some(config) = ctx.store.community(&community).await? {
            communities.insert(community.clone(), config);
        }
        rule_sets.publish(&community, conditions);
    }

    Ok(())
}
