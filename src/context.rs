use crate::config::Settings;
use crate::pattern::standards::StandardsCache;
use crate::site::{SiteClient, SiteResult};
use crate::store::Store;
use crate::user::Rank;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

/// Moderator and contributor lists go stale slowly; an hour is plenty.
const RANK_CACHE_TTL: Duration = Duration::hours(1);

/// Everything process-wide, constructed once at startup: configuration, the
/// site client, the store, the standards cache, and the per-community
/// moderator/contributor cache.
pub struct Context {
    pub config_dir: PathBuf,
    pub settings: Settings,
    pub site: Arc<dyn SiteClient>,
    pub store: Arc<dyn Store>,
    pub standards: StandardsCache,
    /// Newest inbox message timestamp already processed, persisted back into
    /// the settings file after each inbox pass.
    pub last_message: Mutex<i64>,
    ranks: Mutex<HashMap<String, CommunityRanks>>,
}

struct CommunityRanks {
    moderators: HashSet<String>,
    contributors: HashSet<String>,
    fetched_at: OffsetDateTime,
}

impl Context {
    pub fn new(
        config_dir: PathBuf,
        settings: Settings,
        site: Arc<dyn SiteClient>,
        store: Arc<dyn Store>,
    ) -> Self {
        let last_message = settings.last_message;
        Self {
            config_dir,
            settings,
            site,
            store,
            standards: StandardsCache::new(),
            last_message: Mutex::new(last_message),
            ranks: Mutex::new(HashMap::new()),
        }
    }

    /// A user's rank in a community, from the cached moderator and
    /// contributor lists. The first use after the TTL expires re-fetches.
    pub async fn user_rank(&self, community: &str, user: &str) -> SiteResult<Rank> {
        let mut ranks = self.ranks.lock().await;
        let now = OffsetDateTime::now_utc();

        let stale = match ranks.get(community) {
            Some(cached) => now - cached.fetched_at >= RANK_CACHE_TTL,
            None => true,
        };
        if stale {
            let moderators = self.site.moderators(community).await?;
            let contributors = match self.site.contributors(community).await {
                Ok(contributors) => contributors,
                // communities without a contributor list 404 it
                Err(e) if e.is_not_found() => vec![],
                Err(e) => return Err(e),
            };
            ranks.insert(
                community.to_string(),
                CommunityRanks {
                    moderators: moderators.into_iter().collect(),
                    contributors: contributors.into_iter().collect(),
                    fetched_at: now,
                },
            );
        }

        let cached = ranks.get(community).expect("just inserted");
        Ok(if cached.moderators.contains(user) {
            Rank::Moderator
        } else if cached.contributors.contains(user) {
            Rank::Contributor
        } else {
            Rank::User
        })
    }
}
