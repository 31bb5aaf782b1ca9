use std::sync::Arc;

use crate::{
    auth::SessionService,
    config::Config,
    database::Database,
    errors::Result,
    services::{
        AiGateway, FavoriteService, ListingService, MetricsService, QuotaManager, UploadService,
    },
    storage::{self, Storage},
};

pub mod admin;
pub mod ai;
pub mod auth;
pub mod health;
pub mod listings;
pub mod metrics;

#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub sessions: Arc<SessionService>,
    pub uploads: UploadService,
    pub listings: ListingService,
    pub favorites: FavoriteService,
    pub quota: QuotaManager,
    pub ai: Arc<AiGateway>,
    pub metrics: MetricsService,
}

impl AppState {
    /// Connects to the configured database and upload directory.
    pub async fn new(config: Config) -> Result<Self> {
        let database = Database::new(&config.database_url).await?;
        let storage = storage::create_storage(&config)?;
        Self::from_parts(config, database, storage)
    }

    pub fn from_parts(
        config: Config,
        database: Database,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let uploads = UploadService::new(storage.clone(), &config);
        let listings = ListingService::new(database.clone(), uploads.clone(), config.admin_user_id);
        let favorites = FavoriteService::new(database.clone());
        let quota = QuotaManager::new(database.clone(), config.ai.daily_limit);
        let ai = Arc::new(AiGateway::new(&config.ai)?);
        let sessions = Arc::new(SessionService::new(&config.session));
        let metrics = MetricsService::new()?;

        Ok(Self {
            database,
            config: Arc::new(config),
            storage,
            sessions,
            uploads,
            listings,
            favorites,
            quota,
            ai,
            metrics,
        })
    }
}
