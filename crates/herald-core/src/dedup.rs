//! Duplicate detection on two axes: normalized URL and content hash.
//!
//! Intra-job truth lives in a [`DuplicateDetector`]'s own in-memory sets,
//! created with the job and dropped with it. Cross-job truth is delegated
//! to the [`ContentStore`].

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use url::Url;

use crate::error::AppError;
use crate::models::{Candidate, ExtractionResult, compute_hash};
use crate::simhash::{hamming_distance, simhash};
use crate::traits::ContentStore;
use crate::util::collapse_whitespace;

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid", "_ga", "_gl",
    "yclid", "msclkid", "spm", "cmpid",
];
const TRACKING_PREFIXES: &[&str] = &["utm_", "pk_", "mtm_"];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&name.as_str())
        || TRACKING_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Canonical form of an article URL.
///
/// Lower-cases scheme and host, drops the default port, the fragment and
/// tracking parameters, sorts the remaining query pairs and strips a
/// trailing slash everywhere but the root path.
pub fn normalize_url(raw: &str) -> Result<String, AppError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| AppError::ValidationError(format!("Invalid URL '{raw}': {e}")))?;

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    }

    Ok(url.to_string())
}

/// Body text as hashed: lower-cased with whitespace collapsed.
pub fn normalize_body(body: &str) -> String {
    collapse_whitespace(&body.to_lowercase())
}

/// SHA-256 of the normalized body, 64 hex chars.
pub fn content_hash(body: &str) -> String {
    compute_hash(&normalize_body(body))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DuplicateReason {
    NormalizedUrl,
    ContentHash,
    NearDuplicate { distance: u32 },
    /// The store's insert-if-absent lost a race to a concurrent writer.
    StoreConflict,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::NormalizedUrl => write!(f, "normalized-url"),
            DuplicateReason::ContentHash => write!(f, "content-hash"),
            DuplicateReason::NearDuplicate { distance } => {
                write!(f, "near-duplicate (distance {distance})")
            }
            DuplicateReason::StoreConflict => write!(f, "store-conflict"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub reason: Option<DuplicateReason>,
}

impl DuplicateVerdict {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            reason: None,
        }
    }

    pub fn duplicate(reason: DuplicateReason) -> Self {
        Self {
            is_duplicate: true,
            reason: Some(reason),
        }
    }
}

/// Near-duplicate detection settings. Disabled unless configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearDuplicateConfig {
    /// Largest Hamming distance still considered a duplicate.
    pub max_distance: u32,
    pub shingle_size: usize,
}

impl Default for NearDuplicateConfig {
    fn default() -> Self {
        Self {
            max_distance: 3,
            shingle_size: 3,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Job-scoped duplicate detector.
///
/// The in-memory sets are only touched under short, synchronous locks that
/// are never held across an await.
#[derive(Debug)]
pub struct DuplicateDetector<S> {
    store: S,
    near: Option<NearDuplicateConfig>,
    urls: Mutex<HashSet<String>>,
    hashes: Mutex<HashSet<String>>,
    fingerprints: Mutex<Vec<u64>>,
}

impl<S: ContentStore> DuplicateDetector<S> {
    pub fn new(store: S, near: Option<NearDuplicateConfig>) -> Self {
        Self {
            store,
            near,
            urls: Mutex::new(HashSet::new()),
            hashes: Mutex::new(HashSet::new()),
            fingerprints: Mutex::new(Vec::new()),
        }
    }

    /// Batch pre-check: which of these normalized URLs the store already has.
    pub async fn prefetch_known_urls(
        &self,
        normalized: &[String],
    ) -> Result<HashSet<String>, AppError> {
        if normalized.is_empty() {
            return Ok(HashSet::new());
        }
        self.store.existing_normalized_urls(normalized).await
    }

    /// URL axis. Claims the URL for this job; a second claim is a duplicate.
    ///
    /// When `known` holds the result of [`prefetch_known_urls`](Self::prefetch_known_urls)
    /// the store is not queried again.
    pub async fn check_url(
        &self,
        normalized: &str,
        known: Option<&HashSet<String>>,
    ) -> Result<DuplicateVerdict, AppError> {
        if !lock(&self.urls).insert(normalized.to_string()) {
            return Ok(DuplicateVerdict::duplicate(DuplicateReason::NormalizedUrl));
        }
        let stored = match known {
            Some(known) => known.contains(normalized),
            None => self.store.exists_by_normalized_url(normalized).await?,
        };
        Ok(if stored {
            DuplicateVerdict::duplicate(DuplicateReason::NormalizedUrl)
        } else {
            DuplicateVerdict::unique()
        })
    }

    /// Content axis: exact hash, then near-duplicate fingerprint when enabled.
    ///
    /// Returns the fingerprint computed for a unique result so it can be
    /// persisted alongside the content.
    pub async fn check_content(
        &self,
        result: &ExtractionResult,
    ) -> Result<(DuplicateVerdict, Option<u64>), AppError> {
        if !lock(&self.hashes).insert(result.content_hash.clone()) {
            return Ok((DuplicateVerdict::duplicate(DuplicateReason::ContentHash), None));
        }
        if self.store.exists_by_hash(&result.content_hash).await? {
            return Ok((DuplicateVerdict::duplicate(DuplicateReason::ContentHash), None));
        }

        let Some(near) = self.near else {
            return Ok((DuplicateVerdict::unique(), None));
        };

        let fingerprint = simhash(&result.body, near.shingle_size);
        let closest = lock(&self.fingerprints)
            .iter()
            .map(|seen| hamming_distance(*seen, fingerprint))
            .min();
        if let Some(distance) = closest.filter(|d| *d <= near.max_distance) {
            return Ok((
                DuplicateVerdict::duplicate(DuplicateReason::NearDuplicate { distance }),
                Some(fingerprint),
            ));
        }
        if let Some(distance) = self
            .store
            .find_near_duplicate(fingerprint, near.max_distance)
            .await?
        {
            return Ok((
                DuplicateVerdict::duplicate(DuplicateReason::NearDuplicate { distance }),
                Some(fingerprint),
            ));
        }

        lock(&self.fingerprints).push(fingerprint);
        Ok((DuplicateVerdict::unique(), Some(fingerprint)))
    }

    /// Both axes for one candidate. Either match marks it duplicate.
    pub async fn is_duplicate(
        &self,
        candidate: &Candidate,
        result: &ExtractionResult,
    ) -> Result<DuplicateVerdict, AppError> {
        let normalized = normalize_url(&candidate.url)?;
        let verdict = self.check_url(&normalized, None).await?;
        if verdict.is_duplicate {
            return Ok(verdict);
        }
        let (verdict, _) = self.check_content(result).await?;
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryContentStore;
    use crate::models::ScrapedContent;
    use crate::traits::ContentStore;
    use uuid::Uuid;

    fn result_with_body(body: &str) -> ExtractionResult {
        ExtractionResult {
            title: "Title".into(),
            body: body.into(),
            content_hash: content_hash(body),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_strips_tracking_and_fragment() {
        let a = normalize_url("https://News.Example.com/story/42/?utm_source=tw&id=7&fbclid=x#top")
            .unwrap();
        let b = normalize_url("https://news.example.com:443/story/42?id=7&utm_medium=email")
            .unwrap();
        assert_eq!(a, "https://news.example.com/story/42?id=7");
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_sorts_query_and_keeps_root_slash() {
        assert_eq!(
            normalize_url("http://example.com/a?z=1&b=2").unwrap(),
            "http://example.com/a?b=2&z=1"
        );
        assert_eq!(
            normalize_url("http://example.com/").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            normalize_url("http://example.com/?ref=home").unwrap(),
            "http://example.com/"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_url("not a url"),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_content_hash_ignores_case_and_spacing() {
        assert_eq!(
            content_hash("Hello   World\n\nSecond"),
            content_hash("hello world second")
        );
        assert_eq!(content_hash("x").len(), 64);
    }

    #[tokio::test]
    async fn test_same_url_twice_in_one_job() {
        let detector = DuplicateDetector::new(InMemoryContentStore::new(), None);
        let first = detector.check_url("https://a.example/1", None).await.unwrap();
        let second = detector.check_url("https://a.example/1", None).await.unwrap();
        assert!(!first.is_duplicate);
        assert_eq!(
            second,
            DuplicateVerdict::duplicate(DuplicateReason::NormalizedUrl)
        );
    }

    #[tokio::test]
    async fn test_stored_url_is_duplicate_across_jobs() {
        let store = InMemoryContentStore::new();
        let candidate = Candidate::new("https://a.example/story?utm_source=x", "feed");
        let result = result_with_body("first body");
        let record = ScrapedContent::new(
            Uuid::new_v4(),
            &candidate,
            normalize_url(&candidate.url).unwrap(),
            &result,
        );
        store.upsert_scraped_content(&record).await.unwrap();

        let detector = DuplicateDetector::new(store, None);
        let repeat = Candidate::new("https://a.example/story?utm_campaign=y", "feed");
        let verdict = detector
            .is_duplicate(&repeat, &result_with_body("different body"))
            .await
            .unwrap();
        assert_eq!(
            verdict,
            DuplicateVerdict::duplicate(DuplicateReason::NormalizedUrl)
        );
    }

    #[tokio::test]
    async fn test_prefetched_set_is_used_without_store_lookup() {
        let detector = DuplicateDetector::new(InMemoryContentStore::new(), None);
        let known: HashSet<String> = ["https://a.example/old".to_string()].into();
        let verdict = detector
            .check_url("https://a.example/old", Some(&known))
            .await
            .unwrap();
        assert!(verdict.is_duplicate);
    }

    #[tokio::test]
    async fn test_same_body_under_different_urls() {
        let detector = DuplicateDetector::new(InMemoryContentStore::new(), None);
        let body = "Syndicated wire copy. Same text everywhere.";
        let first = detector
            .is_duplicate(&Candidate::new("https://a.example/1", "a"), &result_with_body(body))
            .await
            .unwrap();
        let second = detector
            .is_duplicate(&Candidate::new("https://b.example/2", "b"), &result_with_body(body))
            .await
            .unwrap();
        assert!(!first.is_duplicate);
        assert_eq!(
            second,
            DuplicateVerdict::duplicate(DuplicateReason::ContentHash)
        );
    }

    #[tokio::test]
    async fn test_near_duplicate_detection_when_enabled() {
        let detector = DuplicateDetector::new(
            InMemoryContentStore::new(),
            Some(NearDuplicateConfig::default()),
        );
        let body = "The harbour authority reopened the north pier on Monday after repairs \
                    to the storm-damaged breakwater were finished ahead of schedule. Fishing crews \
                    that had moored in the southern basin since January moved their boats back \
                    during the afternoon, and the ferry operator said the first regular crossing \
                    would leave at seven on Tuesday morning. Engineers replaced the concrete caps \
                    along a ninety metre stretch of the wall and installed new lighting on the \
                    access road, while the harbour master thanked residents for their patience \
                    through a long and noisy winter of construction work.";
        let (first, fp) = detector.check_content(&result_with_body(body)).await.unwrap();
        assert!(!first.is_duplicate);
        assert!(fp.is_some());

        let edited = body.replace("ninety", "eighty");
        let (second, _) = detector
            .check_content(&result_with_body(&edited))
            .await
            .unwrap();
        match second.reason {
            Some(DuplicateReason::NearDuplicate { distance }) => assert!(distance <= 3),
            other => panic!("expected near duplicate, got {other:?}"),
        }

        let unrelated = "Quarterly earnings beat expectations as cloud revenue grew sharply \
                         while hardware sales declined for the third consecutive quarter, the \
                         company said in a statement that also announced a new share buyback \
                         programme and the departure of its chief financial officer after \
                         eleven years in the role.";
        let (third, fp) = detector
            .check_content(&result_with_body(unrelated))
            .await
            .unwrap();
        assert!(!third.is_duplicate);
        assert!(third.reason.is_none());
        assert!(fp.is_some());
    }

    #[tokio::test]
    async fn test_near_duplicate_disabled_by_default() {
        let detector = DuplicateDetector::new(InMemoryContentStore::new(), None);
        let (verdict, fp) = detector
            .check_content(&result_with_body("some text"))
            .await
            .unwrap();
        assert!(!verdict.is_duplicate);
        assert_eq!(fp, None);
    }
}
