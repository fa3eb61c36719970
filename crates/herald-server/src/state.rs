use herald_client::{
    ALLOW_PRIVATE_URLS_VAR, AlertTarget, ArticleExtractor, LinkListingProvider, ReqwestFetcher,
    private_urls_allowed,
};
use herald_core::circuit_breaker::CircuitBreaker;
use herald_core::{AppError, Collaborators, Orchestrator, OrchestratorConfig};
use herald_db::{ContentRepository, Database, EventRepository, JobRepository, SourceRepository};

pub type ServerOrchestrator = Orchestrator<
    ReqwestFetcher,
    LinkListingProvider<ReqwestFetcher>,
    ArticleExtractor,
    ContentRepository,
    JobRepository,
    SourceRepository,
    EventRepository,
    AlertTarget,
>;

/// Shared application state, available to all handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub orchestrator: ServerOrchestrator,
    pub sources: SourceRepository,
}

/// Everything the server reads from the environment besides the database.
pub struct ServerSettings {
    pub orchestrator: OrchestratorConfig,
    pub breaker: CircuitBreaker,
    pub alerts: AlertTarget,
    /// Lets sources point at private addresses (local fixtures).
    pub allow_private_urls: bool,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            orchestrator: OrchestratorConfig::from_env()?,
            breaker: CircuitBreaker::default(),
            alerts: AlertTarget::from_env()?,
            allow_private_urls: private_urls_allowed(
                std::env::var(ALLOW_PRIVATE_URLS_VAR).ok().as_deref(),
            ),
        })
    }
}

impl AppState {
    pub fn new(db: Database, settings: ServerSettings) -> Result<Self, AppError> {
        let mut fetcher = ReqwestFetcher::with_timeout(settings.orchestrator.fetch_timeout)?;
        if settings.allow_private_urls {
            fetcher = fetcher.allow_private_urls();
        }
        let sources = db.source_repo(settings.breaker);
        let orchestrator = Orchestrator::new(
            Collaborators {
                provider: LinkListingProvider::new(fetcher.clone()),
                fetcher,
                extractor: ArticleExtractor::default(),
                content: db.content_repo(),
                jobs: db.job_repo(),
                sources: sources.clone(),
                events: db.event_repo(),
                alerts: settings.alerts,
            },
            settings.orchestrator,
        );
        Ok(Self {
            db,
            orchestrator,
            sources,
        })
    }
}
