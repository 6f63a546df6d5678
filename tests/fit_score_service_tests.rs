/// Fit-score service behaviour against an in-memory repository.
/// Call counters assert which reads and writes each operation performs.
use async_trait::async_trait;
use chrono::Utc;
use creator_profile_api::errors::AppError;
use creator_profile_api::fit_score::{
    calculate_fit_score, weights, FitScoreBreakdown, FitScoreInput, FitScoreResult,
    FIT_SCORE_VERSION,
};
use creator_profile_api::fit_score_service::{FitScoreRepository, FitScoreService};
use creator_profile_api::models::{FitProfileSummary, StoredFitScore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone)]
struct Profile {
    input: FitScoreInput,
    claimed: bool,
    score: Option<i32>,
    breakdown: Option<FitScoreBreakdown>,
}

#[derive(Default)]
struct InMemoryRepo {
    profiles: Mutex<BTreeMap<Uuid, Profile>>,
    load_calls: AtomicUsize,
    single_writes: AtomicUsize,
    batch_writes: AtomicUsize,
    adjustments: AtomicUsize,
    page_calls: AtomicUsize,
}

impl InMemoryRepo {
    fn insert(&self, id: Uuid, input: FitScoreInput, claimed: bool) {
        self.profiles.lock().unwrap().insert(
            id,
            Profile {
                input,
                claimed,
                score: None,
                breakdown: None,
            },
        );
    }

    fn insert_scored(&self, id: Uuid, input: FitScoreInput, result: FitScoreResult) {
        self.profiles.lock().unwrap().insert(
            id,
            Profile {
                input,
                claimed: false,
                score: Some(result.score),
                breakdown: Some(result.breakdown),
            },
        );
    }

    fn score_of(&self, id: Uuid) -> Option<i32> {
        self.profiles.lock().unwrap().get(&id).and_then(|p| p.score)
    }

    fn writes(&self) -> usize {
        self.single_writes.load(Ordering::SeqCst)
            + self.batch_writes.load(Ordering::SeqCst)
            + self.adjustments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FitScoreRepository for InMemoryRepo {
    async fn load_input(&self, profile_id: Uuid) -> Result<Option<FitScoreInput>, AppError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(&profile_id)
            .map(|p| p.input.clone()))
    }

    async fn load_inputs(
        &self,
        profile_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, FitScoreInput)>, AppError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let profiles = self.profiles.lock().unwrap();
        Ok(profile_ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|p| (*id, p.input.clone())))
            .collect())
    }

    async fn store_score(&self, profile_id: Uuid, result: &FitScoreResult) -> Result<(), AppError> {
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(p) = self.profiles.lock().unwrap().get_mut(&profile_id) {
            p.score = Some(result.score);
            p.breakdown = Some(result.breakdown.clone());
        }
        Ok(())
    }

    async fn store_scores(&self, results: &[(Uuid, FitScoreResult)]) -> Result<u64, AppError> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        let mut profiles = self.profiles.lock().unwrap();
        let mut updated = 0;
        for (id, result) in results {
            if let Some(p) = profiles.get_mut(id) {
                p.score = Some(result.score);
                p.breakdown = Some(result.breakdown.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn missing_score_ids(&self, limit: i64) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.score.is_none())
            .map(|(id, _)| *id)
            .take(limit as usize)
            .collect())
    }

    async fn unclaimed_ids_after(
        &self,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, p)| !p.claimed && cursor.map_or(true, |c| **id > c))
            .map(|(id, _)| *id)
            .take(limit as usize)
            .collect())
    }

    async fn top_profiles(
        &self,
        limit: i64,
        min_score: i32,
    ) -> Result<Vec<FitProfileSummary>, AppError> {
        let mut rows: Vec<FitProfileSummary> = self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| !p.claimed)
            .filter_map(|(id, p)| {
                p.score.filter(|s| *s >= min_score).map(|score| FitProfileSummary {
                    id: *id,
                    username: id.to_string(),
                    display_name: None,
                    spotify_id: p.input.spotify_id.clone(),
                    fit_score: score,
                    fit_score_breakdown: None,
                    fit_score_updated_at: None,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.fit_score.cmp(&a.fit_score));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn stored_score(&self, profile_id: Uuid) -> Result<Option<StoredFitScore>, AppError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(&profile_id)
            .map(|p| StoredFitScore {
                profile_id,
                score: p.score,
                breakdown: p.breakdown.clone(),
            }))
    }

    async fn store_paid_tier_adjustment(
        &self,
        profile_id: Uuid,
        score: i32,
        breakdown: &FitScoreBreakdown,
    ) -> Result<(), AppError> {
        self.adjustments.fetch_add(1, Ordering::SeqCst);
        if let Some(p) = self.profiles.lock().unwrap().get_mut(&profile_id) {
            p.score = Some(score);
            p.breakdown = Some(breakdown.clone());
        }
        Ok(())
    }
}

fn spotify_input(has_paid_tier: bool) -> FitScoreInput {
    FitScoreInput {
        ingestion_source_platform: Some("linktree".to_string()),
        has_paid_tier,
        spotify_id: Some("4Z8W4fKeB5YxbusRsdQVPb".to_string()),
        spotify_popularity: Some(60),
        genres: vec!["Indie Pop".to_string()],
        ..Default::default()
    }
}

fn service(repo: &Arc<InMemoryRepo>) -> FitScoreService {
    FitScoreService::new(repo.clone())
}

#[tokio::test]
async fn test_calculate_and_store_single_profile() {
    let repo = Arc::new(InMemoryRepo::default());
    let id = Uuid::new_v4();
    repo.insert(id, spotify_input(false), false);

    let result = service(&repo)
        .calculate_and_store_fit_score(id)
        .await
        .unwrap()
        .expect("profile exists");

    assert_eq!(repo.score_of(id), Some(result.score));
    assert_eq!(repo.single_writes.load(Ordering::SeqCst), 1);
    assert_eq!(result.breakdown.meta.version, FIT_SCORE_VERSION);
}

#[tokio::test]
async fn test_calculate_unknown_profile_returns_none_without_writing() {
    let repo = Arc::new(InMemoryRepo::default());

    let result = service(&repo)
        .calculate_and_store_fit_score(Uuid::new_v4())
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(repo.writes(), 0);
}

#[tokio::test]
async fn test_zero_missing_profiles_makes_no_loads_or_writes() {
    let repo = Arc::new(InMemoryRepo::default());
    let id = Uuid::new_v4();
    let input = spotify_input(false);
    let result = calculate_fit_score(&input, Utc::now());
    repo.insert_scored(id, input, result);

    let processed = service(&repo).calculate_missing_fit_scores(50).await.unwrap();

    assert_eq!(processed, 0);
    assert_eq!(repo.load_calls.load(Ordering::SeqCst), 0);
    assert_eq!(repo.batch_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_profiles_are_scored_in_one_batch() {
    let repo = Arc::new(InMemoryRepo::default());
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        repo.insert(*id, spotify_input(false), false);
    }

    let processed = service(&repo).calculate_missing_fit_scores(50).await.unwrap();

    assert_eq!(processed, 3);
    assert_eq!(repo.batch_writes.load(Ordering::SeqCst), 1);
    assert!(ids.iter().all(|id| repo.score_of(*id).is_some()));
}

#[tokio::test]
async fn test_missing_respects_limit() {
    let repo = Arc::new(InMemoryRepo::default());
    for _ in 0..5 {
        repo.insert(Uuid::new_v4(), FitScoreInput::default(), false);
    }

    let processed = service(&repo).calculate_missing_fit_scores(2).await.unwrap();
    assert_eq!(processed, 2);
}

#[tokio::test]
async fn test_recalculate_pages_through_unclaimed_only() {
    let repo = Arc::new(InMemoryRepo::default());
    for _ in 0..5 {
        repo.insert(Uuid::new_v4(), spotify_input(false), false);
    }
    let claimed = Uuid::new_v4();
    repo.insert(claimed, spotify_input(false), true);

    let processed = service(&repo).recalculate_all_fit_scores(2).await.unwrap();

    assert_eq!(processed, 5);
    // Pages of 2, 2 and a short page of 1 ends the loop.
    assert_eq!(repo.page_calls.load(Ordering::SeqCst), 3);
    assert_eq!(repo.batch_writes.load(Ordering::SeqCst), 3);
    assert_eq!(repo.score_of(claimed), None);
}

#[tokio::test]
async fn test_recalculate_exact_multiple_needs_one_empty_page() {
    let repo = Arc::new(InMemoryRepo::default());
    for _ in 0..4 {
        repo.insert(Uuid::new_v4(), FitScoreInput::default(), false);
    }

    let processed = service(&repo).recalculate_all_fit_scores(2).await.unwrap();

    assert_eq!(processed, 4);
    assert_eq!(repo.page_calls.load(Ordering::SeqCst), 3);
    assert_eq!(repo.batch_writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unchanged_paid_tier_never_writes() {
    let repo = Arc::new(InMemoryRepo::default());
    let id = Uuid::new_v4();
    let input = spotify_input(true);
    let result = calculate_fit_score(&input, Utc::now());
    let stored = result.score;
    repo.insert_scored(id, input, result);

    let score = service(&repo).update_paid_tier_score(id, true).await.unwrap();

    assert_eq!(score, Some(stored));
    assert_eq!(repo.writes(), 0);
    assert_eq!(repo.load_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_changed_paid_tier_adjusts_only_that_component() {
    let repo = Arc::new(InMemoryRepo::default());
    let id = Uuid::new_v4();
    let input = spotify_input(false);
    let result = calculate_fit_score(&input, Utc::now());
    let before = result.clone();
    repo.insert_scored(id, input, result);

    let score = service(&repo)
        .update_paid_tier_score(id, true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(score, before.score + weights::PAID_TIER);
    assert_eq!(repo.adjustments.load(Ordering::SeqCst), 1);
    assert_eq!(repo.single_writes.load(Ordering::SeqCst), 0);
    assert_eq!(repo.load_calls.load(Ordering::SeqCst), 0);

    let after = repo.profiles.lock().unwrap()[&id].breakdown.clone().unwrap();
    assert_eq!(after.paid_tier, weights::PAID_TIER);
    assert_eq!(after.has_spotify, before.breakdown.has_spotify);
    assert_eq!(after.spotify_popularity, before.breakdown.spotify_popularity);
}

#[tokio::test]
async fn test_stale_breakdown_falls_back_to_full_recompute() {
    let repo = Arc::new(InMemoryRepo::default());
    let id = Uuid::new_v4();
    let input = spotify_input(false);
    let mut result = calculate_fit_score(&input, Utc::now());
    result.breakdown.meta.version = FIT_SCORE_VERSION - 1;
    repo.insert_scored(id, input.clone(), result);

    let score = service(&repo)
        .update_paid_tier_score(id, true)
        .await
        .unwrap()
        .unwrap();

    let expected = calculate_fit_score(
        &FitScoreInput {
            has_paid_tier: true,
            ..input
        },
        Utc::now(),
    );
    assert_eq!(score, expected.score);
    assert_eq!(repo.single_writes.load(Ordering::SeqCst), 1);
    assert_eq!(repo.adjustments.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unscored_profile_paid_tier_is_full_recompute() {
    let repo = Arc::new(InMemoryRepo::default());
    let id = Uuid::new_v4();
    repo.insert(id, spotify_input(false), false);

    let score = service(&repo).update_paid_tier_score(id, true).await.unwrap();

    assert!(score.is_some());
    assert_eq!(repo.single_writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_paid_tier_for_unknown_profile_is_none() {
    let repo = Arc::new(InMemoryRepo::default());
    let score = service(&repo)
        .update_paid_tier_score(Uuid::new_v4(), true)
        .await
        .unwrap();
    assert_eq!(score, None);
    assert_eq!(repo.writes(), 0);
}

#[tokio::test]
async fn test_top_profiles_ordered_and_filtered() {
    let repo = Arc::new(InMemoryRepo::default());
    let low = Uuid::new_v4();
    let high = Uuid::new_v4();
    repo.insert_scored(low, FitScoreInput::default(), calculate_fit_score(&FitScoreInput::default(), Utc::now()));
    let strong = spotify_input(true);
    repo.insert_scored(high, strong.clone(), calculate_fit_score(&strong, Utc::now()));

    let top = service(&repo).get_top_fit_profiles(10, 1).await.unwrap();

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, high);
}
