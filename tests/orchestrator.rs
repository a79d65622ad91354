//! Orchestrator integration tests
//!
//! Drive single items through the provider chain with stub providers, an
//! in-memory catalog and a manual clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{add_stub, echo_url, generous_limit, StubSearch, TestHarness};
use imagefetch::catalog::{Catalog, ImageMetadata};
use imagefetch::credentials::CredentialState;
use imagefetch::orchestrator::{RunContext, DUPLICATE_REASON};
use imagefetch::providers::ProviderError;
use imagefetch::rate_limit::RateLimit;
use imagefetch_common::{
    Error, ImageFormat, ItemId, ItemStatus, JobKind, ProviderKind, ProviderStatus, Result,
};
use imagefetch_db::models::Item;

fn ctx() -> RunContext {
    RunContext::new(JobKind::Manual)
}

#[tokio::test]
async fn test_item_with_image_is_skipped_without_calls() {
    let harness = TestHarness::new();
    let mut item = Item::named("Cordless drill");
    item.has_image = true;
    let item = harness.add_item(item);

    let google = StubSearch::returning(ProviderKind::Google, &["https://cdn/a.jpg"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::SkippedHasImage);
    assert!(record.attempts.is_empty());
    assert_eq!(record.network_calls(), 0);
    assert_eq!(google.calls(), 0);
}

#[tokio::test]
async fn test_force_update_ignores_existing_image() {
    let harness = TestHarness::new();
    let mut item = Item::named("Cordless drill");
    item.has_image = true;
    let item = harness.add_item(item);
    harness
        .fetcher
        .add_unique("https://cdn/a.jpg", 1000, 1000, ImageFormat::Jpeg);

    let google = StubSearch::returning(ProviderKind::Google, &["https://cdn/a.jpg"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let mut ctx = ctx();
    ctx.force_update = true;
    let record = orchestrator.process(&item, &ctx).await;
    assert_eq!(record.status, ItemStatus::Success);
    assert_eq!(google.calls(), 1);
}

#[tokio::test]
async fn test_quota_exhausted_provider_falls_back() {
    let harness = TestHarness::new();
    let mut item = Item::named("Impact driver");
    item.sku = Some("X1".into());
    let item = harness.add_item(item);
    harness.fetcher.add(
        "https://cdn/x1.jpg",
        1000,
        1000,
        ImageFormat::Jpeg,
        &vec![7u8; 200 * 1024],
    );

    let amazon = StubSearch::returning(ProviderKind::Amazon, &["https://amazon/x1.jpg"]);
    let google = StubSearch::returning(ProviderKind::Google, &["https://cdn/x1.jpg"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &amazon, generous_limit(), 0);
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;

    assert_eq!(record.status, ItemStatus::Success);
    assert_eq!(
        record.attempt(ProviderKind::Amazon).unwrap().status,
        ProviderStatus::RateLimited
    );
    let google_attempt = record.attempt(ProviderKind::Google).unwrap();
    assert_eq!(google_attempt.status, ProviderStatus::Success);
    assert_eq!(google_attempt.query.as_deref(), Some("X1"));
    assert_eq!(amazon.calls(), 0);

    let chosen = record.chosen.as_ref().unwrap();
    assert_eq!(chosen.provider, ProviderKind::Google);
    assert_eq!((chosen.width, chosen.height), (1000, 1000));
    assert_eq!(chosen.format, ImageFormat::Jpeg);
    assert_eq!(chosen.quality_score, 70);

    let stored = harness.item(&item);
    assert!(stored.has_image);
    assert_eq!(stored.last_status, Some(ItemStatus::Success));
}

#[tokio::test]
async fn test_no_providers_is_all_providers_failed() {
    let harness = TestHarness::new();
    let item = harness.add_named("Hammer");
    let orchestrator = harness.orchestrator();

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::AllProvidersFailed);
    assert_eq!(record.network_calls(), 0);
    assert!(harness.fetcher.fetched().is_empty());
}

#[tokio::test]
async fn test_small_candidate_rejected_then_next_accepted() {
    let harness = TestHarness::new();
    let item = harness.add_named("Angle grinder");
    harness
        .fetcher
        .add_unique("https://cdn/small.jpg", 400, 300, ImageFormat::Jpeg);
    harness
        .fetcher
        .add_unique("https://cdn/big.png", 1200, 900, ImageFormat::Png);

    let bing = StubSearch::returning(
        ProviderKind::Bing,
        &["https://cdn/small.jpg", "https://cdn/big.png", "https://cdn/never.jpg"],
    );
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &bing, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::Success);

    let attempt = record.attempt(ProviderKind::Bing).unwrap();
    assert_eq!(attempt.candidates_tried, 2);
    assert_eq!(attempt.rejections.len(), 1);
    assert_eq!(attempt.rejections[0].reason, "min-dimensions");
    assert_eq!(record.chosen.unwrap().source_url, "https://cdn/big.png");

    // Candidates after the accepted one are never downloaded.
    assert_eq!(
        harness.fetcher.fetched(),
        vec!["https://cdn/small.jpg", "https://cdn/big.png"]
    );
}

#[tokio::test]
async fn test_rejected_candidates_advance_to_next_provider() {
    let harness = TestHarness::new();
    let item = harness.add_named("Angle grinder");
    harness
        .fetcher
        .add_unique("https://cdn/small.jpg", 400, 300, ImageFormat::Jpeg);
    harness
        .fetcher
        .add_unique("https://cdn/anim.gif", 1200, 900, ImageFormat::Gif);

    let google = StubSearch::returning(
        ProviderKind::Google,
        &["https://cdn/small.jpg", "https://cdn/anim.gif", "https://cdn/missing.jpg"],
    );
    let bing = StubSearch::failing(ProviderKind::Bing, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);
    add_stub(&mut orchestrator, &bing, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::NoMatch);

    let reasons: Vec<&str> = record
        .attempt(ProviderKind::Google)
        .unwrap()
        .rejections
        .iter()
        .map(|r| r.reason.as_str())
        .collect();
    assert_eq!(reasons, vec!["min-dimensions", "format", "download"]);
    assert_eq!(
        record.attempt(ProviderKind::Google).unwrap().status,
        ProviderStatus::NoMatch
    );
    assert_eq!(
        record.attempt(ProviderKind::Bing).unwrap().status,
        ProviderStatus::NoResults
    );
    assert_eq!(bing.calls(), 1);
    assert!(!harness.item(&item).has_image);
}

#[tokio::test]
async fn test_duplicate_content_from_other_url_is_rejected() {
    let harness = TestHarness::new();
    let first = harness.add_named("Drill A");
    let second = harness.add_named("Drill B");
    let shared = b"identical image bytes";
    harness
        .fetcher
        .add("https://a.example/img.jpg", 1000, 800, ImageFormat::Jpeg, shared);
    harness
        .fetcher
        .add("https://b.example/copy.jpg", 1000, 800, ImageFormat::Jpeg, shared);
    harness
        .fetcher
        .add_unique("https://b.example/other.jpg", 1000, 800, ImageFormat::Jpeg);

    let google = StubSearch::returning(ProviderKind::Google, &["https://a.example/img.jpg"]);
    let bing = StubSearch::returning(
        ProviderKind::Bing,
        &["https://b.example/copy.jpg", "https://b.example/other.jpg"],
    );
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);
    add_stub(&mut orchestrator, &bing, generous_limit(), 100);

    let record = orchestrator.process(&first, &ctx()).await;
    assert_eq!(record.status, ItemStatus::Success);

    // Google's only hit is now a duplicate; Bing's second hit is new content.
    google.set_response(Ok(vec![imagefetch::providers::CandidateRef::new(
        ProviderKind::Google,
        "https://b.example/copy.jpg",
    )]));
    let record = orchestrator.process(&second, &ctx()).await;
    assert_eq!(record.status, ItemStatus::Success);
    let google_attempt = record.attempt(ProviderKind::Google).unwrap();
    assert_eq!(google_attempt.rejections.len(), 1);
    assert_eq!(google_attempt.rejections[0].reason, DUPLICATE_REASON);
    let bing_attempt = record.attempt(ProviderKind::Bing).unwrap();
    assert_eq!(bing_attempt.rejections[0].reason, DUPLICATE_REASON);
    assert_eq!(
        record.chosen.unwrap().source_url,
        "https://b.example/other.jpg"
    );
}

#[tokio::test]
async fn test_only_duplicates_is_skipped_duplicate() {
    let harness = TestHarness::new();
    let first = harness.add_named("Saw A");
    let second = harness.add_named("Saw B");
    harness
        .fetcher
        .add("https://x/1.jpg", 900, 900, ImageFormat::Jpeg, b"same");
    harness
        .fetcher
        .add("https://y/2.jpg", 900, 900, ImageFormat::Jpeg, b"same");

    let google = StubSearch::returning(ProviderKind::Google, &["https://x/1.jpg", "https://y/2.jpg"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    assert_eq!(
        orchestrator.process(&first, &ctx()).await.status,
        ItemStatus::Success
    );
    let record = orchestrator.process(&second, &ctx()).await;
    assert_eq!(record.status, ItemStatus::SkippedDuplicate);
    assert_eq!(record.attempts[0].rejections.len(), 2);
}

#[tokio::test]
async fn test_stored_hashes_seed_dedup_index() {
    let harness = TestHarness::new();
    let owner = harness.add_named("Owner");
    let item = harness.add_named("Newcomer");
    let bytes = b"already stored";
    harness
        .catalog
        .store_image(
            owner.id,
            bytes,
            &ImageMetadata {
                provider: ProviderKind::Bing,
                source_url: "https://old/img.jpg".into(),
                width: 1000,
                height: 1000,
                format: ImageFormat::Jpeg,
                byte_size: bytes.len() as u64,
                content_hash: imagefetch::dedup::content_hash(bytes),
                quality_score: 70,
            },
        )
        .unwrap();
    harness
        .fetcher
        .add("https://new/img.jpg", 1000, 1000, ImageFormat::Jpeg, bytes);

    let google = StubSearch::returning(ProviderKind::Google, &["https://new/img.jpg"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);
    assert_eq!(orchestrator.load_dedup_index().await.unwrap(), 1);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::SkippedDuplicate);
}

#[tokio::test]
async fn test_auth_failure_disables_credential_and_continues() {
    let harness = TestHarness::new();
    let first = harness.add_named("Level");
    let second = harness.add_named("Tape measure");
    harness
        .fetcher
        .add_unique("https://cdn/level.jpg", 1000, 1000, ImageFormat::Jpeg);

    let google = StubSearch::failing(
        ProviderKind::Google,
        ProviderError::AuthFailure("HTTP 403".into()),
    );
    let bing = StubSearch::returning(ProviderKind::Bing, &["https://cdn/level.jpg"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);
    add_stub(&mut orchestrator, &bing, generous_limit(), 100);

    let record = orchestrator.process(&first, &ctx()).await;
    assert_eq!(record.status, ItemStatus::Success);
    assert_eq!(
        record.attempt(ProviderKind::Google).unwrap().status,
        ProviderStatus::AuthFailure
    );
    let usage = orchestrator.credentials().usage(ProviderKind::Google);
    assert_eq!(usage[0].state, CredentialState::Disabled);

    let record = orchestrator.process(&second, &ctx()).await;
    assert_eq!(
        record.attempt(ProviderKind::Google).unwrap().status,
        ProviderStatus::Unavailable
    );
    assert_eq!(google.calls(), 1);
}

#[tokio::test]
async fn test_rate_limit_denies_without_network_call() {
    let harness = TestHarness::new();
    let first = harness.add_named("Wrench");
    let second = harness.add_named("Pliers");

    let google = StubSearch::failing(ProviderKind::Google, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(
        &mut orchestrator,
        &google,
        RateLimit {
            per_minute: 1,
            per_day: 100,
        },
        100,
    );

    let record = orchestrator.process(&first, &ctx()).await;
    assert_eq!(record.status, ItemStatus::NoMatch);

    let record = orchestrator.process(&second, &ctx()).await;
    assert_eq!(record.status, ItemStatus::RateLimited);
    assert_eq!(record.network_calls(), 0);
    assert_eq!(google.calls(), 1);

    // A denied token does not burn credential quota.
    let usage = orchestrator.credentials().usage(ProviderKind::Google);
    assert_eq!(usage[0].used, 1);

    harness.clock.advance(chrono::Duration::seconds(61));
    let record = orchestrator.process(&second, &ctx()).await;
    assert_eq!(record.status, ItemStatus::NoMatch);
    assert_eq!(google.calls(), 2);
}

#[tokio::test]
async fn test_credential_quota_resets_at_boundary() {
    let harness = TestHarness::new();
    let item = harness.add_named("Chisel");

    let bing = StubSearch::failing(ProviderKind::Bing, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &bing, generous_limit(), 1);

    assert_eq!(
        orchestrator.process(&item, &ctx()).await.status,
        ItemStatus::NoMatch
    );
    assert_eq!(
        orchestrator.process(&item, &ctx()).await.status,
        ItemStatus::RateLimited
    );

    harness.clock.advance(chrono::Duration::hours(13));
    assert_eq!(
        orchestrator.process(&item, &ctx()).await.status,
        ItemStatus::NoMatch
    );
    assert_eq!(bing.calls(), 2);
}

#[tokio::test]
async fn test_transient_failure_recorded_as_network_error() {
    let harness = TestHarness::new();
    let item = harness.add_named("Sander");

    let amazon = StubSearch::failing(
        ProviderKind::Amazon,
        ProviderError::TransientNetwork("connection reset".into()),
    );
    let google = StubSearch::failing(
        ProviderKind::Google,
        ProviderError::MalformedResponse("expected value".into()),
    );
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &amazon, generous_limit(), 100);
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::AllProvidersFailed);
    let amazon_attempt = record.attempt(ProviderKind::Amazon).unwrap();
    assert_eq!(amazon_attempt.status, ProviderStatus::NetworkError);
    assert!(amazon_attempt
        .error
        .as_deref()
        .unwrap()
        .contains("connection reset"));
    assert_eq!(
        record.attempt(ProviderKind::Google).unwrap().status,
        ProviderStatus::MalformedResponse
    );
    assert_eq!(record.network_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_provider_times_out() {
    let harness = TestHarness::new();
    let item = harness.add_named("Router");
    harness
        .fetcher
        .add_unique("https://cdn/router.jpg", 1000, 1000, ImageFormat::Jpeg);

    let slow = StubSearch::slow(ProviderKind::Google, Duration::from_secs(3600));
    let bing = StubSearch::returning(ProviderKind::Bing, &["https://cdn/router.jpg"]);
    let mut orchestrator = harness
        .orchestrator()
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
    add_stub(&mut orchestrator, &slow, generous_limit(), 100);
    add_stub(&mut orchestrator, &bing, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::Success);
    assert_eq!(
        record.attempt(ProviderKind::Google).unwrap().status,
        ProviderStatus::NetworkError
    );
}

#[tokio::test]
async fn test_dry_run_accepts_without_storing() {
    let harness = TestHarness::new();
    let item = harness.add_named("Jigsaw");
    harness
        .fetcher
        .add_unique("https://cdn/jigsaw.png", 1000, 1000, ImageFormat::Png);

    let google = StubSearch::returning(ProviderKind::Google, &["https://cdn/jigsaw.png"]);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let mut ctx = ctx();
    ctx.dry_run = true;
    let record = orchestrator.process(&item, &ctx).await;
    assert_eq!(record.status, ItemStatus::Success);
    assert!(record.dry_run);
    assert!(record.chosen.is_some());

    let stored = harness.item(&item);
    assert!(!stored.has_image);
    assert_eq!(stored.last_status, None);
    assert!(harness.catalog.known_hashes().unwrap().is_empty());
    // The run still remembers the hash.
    assert_eq!(orchestrator.dedup().len(), 1);
}

/// Catalog whose image writes always fail.
struct BrokenStorage {
    inner: Arc<dyn Catalog>,
}

impl Catalog for BrokenStorage {
    fn list_items_needing_images(&self, force: bool, limit: Option<usize>) -> Result<Vec<Item>> {
        self.inner.list_items_needing_images(force, limit)
    }

    fn list_retry_candidates(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        self.inner.list_retry_candidates(limit)
    }

    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        self.inner.get_items(ids)
    }

    fn has_image(&self, item_id: ItemId) -> Result<bool> {
        self.inner.has_image(item_id)
    }

    fn store_image(&self, _: ItemId, _: &[u8], _: &ImageMetadata) -> Result<()> {
        Err(Error::persistence("disk full"))
    }

    fn set_last_outcome(&self, item_id: ItemId, status: ItemStatus, at: DateTime<Utc>) -> Result<()> {
        self.inner.set_last_outcome(item_id, status, at)
    }

    fn known_hashes(&self) -> Result<Vec<(String, ItemId)>> {
        self.inner.known_hashes()
    }
}

#[tokio::test]
async fn test_storage_failure_is_persistence_failed() {
    let harness = TestHarness::new();
    let item = harness.add_named("Clamp");
    harness
        .fetcher
        .add_unique("https://cdn/clamp.jpg", 1000, 1000, ImageFormat::Jpeg);

    let google = StubSearch::returning(ProviderKind::Google, &["https://cdn/clamp.jpg"]);
    let mut orchestrator = harness.orchestrator_with_catalog(Arc::new(BrokenStorage {
        inner: harness.catalog.clone(),
    }));
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::PersistenceFailed);
    assert!(record.error.as_deref().unwrap().contains("disk full"));
    // The hash was not kept, so a later retry can claim it again.
    assert!(orchestrator.dedup().is_empty());
    assert_eq!(
        harness.item(&item).last_status,
        Some(ItemStatus::PersistenceFailed)
    );
}

#[tokio::test]
async fn test_keyword_providers_skip_barcode() {
    let harness = TestHarness::new();
    let mut item = Item::named("Drill bit set");
    item.ean = Some("4006381333931".into());
    let item = harness.add_item(item);

    let google = StubSearch::failing(ProviderKind::Google, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    orchestrator.process(&item, &ctx()).await;
    assert_eq!(google.queries(), vec!["Drill bit set"]);
}

#[tokio::test]
async fn test_identifier_miss_retries_provider_with_name() {
    let harness = TestHarness::new();
    let mut item = Item::named("Cordless Planer");
    item.sku = Some("CP-9".into());
    item.category = Some("Tools".into());
    let item = harness.add_item(item);
    // Only the name search finds a downloadable image.
    harness
        .fetcher
        .add_unique(&echo_url("Cordless Planer"), 1000, 1000, ImageFormat::Jpeg);

    let google = StubSearch::echo(ProviderKind::Google);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;

    assert_eq!(record.status, ItemStatus::Success);
    assert_eq!(google.queries(), vec!["CP-9", "Cordless Planer"]);
    assert_eq!(record.attempts.len(), 2);
    assert!(!record.attempts[0].fallback);
    assert_eq!(record.attempts[0].status, ProviderStatus::NoMatch);
    assert!(record.attempts[1].fallback);
    assert_eq!(record.attempts[1].status, ProviderStatus::Success);
    assert_eq!(record.network_calls(), 2);

    // Each search took its own lease and rate token.
    assert_eq!(orchestrator.credentials().usage(ProviderKind::Google)[0].used, 2);
    assert_eq!(
        orchestrator
            .rate_limiter()
            .stats(ProviderKind::Google)
            .unwrap()
            .today,
        2
    );
}

#[tokio::test]
async fn test_name_fallback_after_no_results_moves_on_when_empty() {
    let harness = TestHarness::new();
    let mut item = Item::named("Socket wrench");
    item.mpn = Some("SW-100".into());
    let item = harness.add_item(item);

    let bing = StubSearch::failing(ProviderKind::Bing, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &bing, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::NoMatch);
    assert_eq!(bing.queries(), vec!["SW-100", "Socket wrench"]);
    assert_eq!(record.attempts.len(), 2);
    assert!(record.attempts.iter().all(|a| a.status == ProviderStatus::NoResults));
}

#[tokio::test]
async fn test_name_query_gets_no_second_search() {
    let harness = TestHarness::new();
    let item = harness.add_named("Tape measure");

    let google = StubSearch::failing(ProviderKind::Google, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::NoMatch);
    assert_eq!(google.calls(), 1);
    assert!(!record.attempts[0].fallback);
}

#[tokio::test]
async fn test_name_fallback_respects_rate_limit() {
    let harness = TestHarness::new();
    let mut item = Item::named("Angle grinder");
    item.sku = Some("AG-1".into());
    let item = harness.add_item(item);

    let google = StubSearch::failing(ProviderKind::Google, ProviderError::NoResults);
    let mut orchestrator = harness.orchestrator();
    add_stub(
        &mut orchestrator,
        &google,
        RateLimit {
            per_minute: 1,
            per_day: 100,
        },
        100,
    );

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::NoMatch);
    assert_eq!(google.calls(), 1);
    assert_eq!(record.attempts.len(), 2);
    assert!(record.attempts[1].fallback);
    assert_eq!(record.attempts[1].status, ProviderStatus::RateLimited);
    // The denied fallback released its lease without spending quota.
    assert_eq!(orchestrator.credentials().usage(ProviderKind::Google)[0].used, 1);
}

/// Catalog that records the thread every call runs on.
struct ThreadRecordingCatalog {
    inner: Arc<dyn Catalog>,
    threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
}

impl ThreadRecordingCatalog {
    fn note(&self) {
        self.threads.lock().push(std::thread::current().id());
    }
}

impl Catalog for ThreadRecordingCatalog {
    fn list_items_needing_images(&self, force: bool, limit: Option<usize>) -> Result<Vec<Item>> {
        self.note();
        self.inner.list_items_needing_images(force, limit)
    }

    fn list_retry_candidates(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        self.note();
        self.inner.list_retry_candidates(limit)
    }

    fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        self.note();
        self.inner.get_items(ids)
    }

    fn has_image(&self, item_id: ItemId) -> Result<bool> {
        self.note();
        self.inner.has_image(item_id)
    }

    fn store_image(&self, item_id: ItemId, bytes: &[u8], metadata: &ImageMetadata) -> Result<()> {
        self.note();
        self.inner.store_image(item_id, bytes, metadata)
    }

    fn set_last_outcome(&self, item_id: ItemId, status: ItemStatus, at: DateTime<Utc>) -> Result<()> {
        self.note();
        self.inner.set_last_outcome(item_id, status, at)
    }

    fn known_hashes(&self) -> Result<Vec<(String, ItemId)>> {
        self.note();
        self.inner.known_hashes()
    }
}

#[tokio::test]
async fn test_catalog_calls_run_off_the_runtime_thread() {
    let harness = TestHarness::new();
    let item = harness.add_named("Hammer");
    harness
        .fetcher
        .add_unique("https://cdn/hammer.jpg", 1000, 1000, ImageFormat::Jpeg);

    let catalog = Arc::new(ThreadRecordingCatalog {
        inner: harness.catalog.clone(),
        threads: parking_lot::Mutex::new(Vec::new()),
    });
    let google = StubSearch::returning(ProviderKind::Google, &["https://cdn/hammer.jpg"]);
    let mut orchestrator = harness.orchestrator_with_catalog(catalog.clone());
    add_stub(&mut orchestrator, &google, generous_limit(), 100);

    let record = orchestrator.process(&item, &ctx()).await;
    assert_eq!(record.status, ItemStatus::Success);

    // has_image, store_image and set_last_outcome.
    let runtime_thread = std::thread::current().id();
    let threads = catalog.threads.lock().clone();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|t| *t != runtime_thread));
}
