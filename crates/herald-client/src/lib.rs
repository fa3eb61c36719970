pub mod alert;
pub mod extract;
pub mod fetcher;
pub mod provider;

pub use alert::{AlertTarget, WebhookAlertSink};
pub use extract::{ArticleExtractor, ExtractorConfig};
pub use fetcher::{ALLOW_PRIVATE_URLS_VAR, ReqwestFetcher, private_urls_allowed};
pub use provider::LinkListingProvider;
