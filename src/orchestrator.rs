//! Food-record orchestration.
//!
//! One submission is one strictly sequential pass through
//! validate → upload → resolve URL → analyze → persist. Every step depends on
//! the previous one, nothing is retried, and a failure aborts the remainder
//! immediately, so a record only ever becomes visible after the whole chain
//! has succeeded. A failure after upload leaves the uploaded object orphaned;
//! this pipeline performs no compensation or rollback.

use crate::analysis::{AnalysisError, NutritionAnalyzer};
use crate::image_store::{generate_image_key, ImageStore};
use crate::record_store::{FoodRecord, MealStore, NewFoodRecord, NutritionTotals};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can abort a meal submission
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Rejected before any network call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Object store upload or URL resolution failed
    #[error("Image upload failed")]
    UploadFailed(#[source] anyhow::Error),

    /// The analysis call itself failed
    #[error("Analysis service unavailable")]
    AnalysisUnavailable(#[source] AnalysisError),

    /// The analysis response was not parseable JSON
    #[error("Analysis response malformed")]
    AnalysisMalformed(#[source] AnalysisError),

    /// The record store append failed after a successful analysis
    #[error("Failed to persist food record")]
    PersistenceFailed(#[source] anyhow::Error),
}

impl From<AnalysisError> for SubmitError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Malformed(_) => Self::AnalysisMalformed(err),
            AnalysisError::Unavailable(_) => Self::AnalysisUnavailable(err),
        }
    }
}

impl SubmitError {
    /// Short user-facing message for this error
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "Please choose an image file",
            Self::UploadFailed(_) => "Could not upload the image, please try again",
            Self::AnalysisUnavailable(_) => "The analysis service is unavailable right now",
            Self::AnalysisMalformed(_) => "The image could not be analyzed, please try again",
            Self::PersistenceFailed(_) => "Could not save the analysis, please try again",
        }
    }

    /// Pipeline stage label for metrics
    fn stage(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "validate",
            Self::UploadFailed(_) => "upload",
            Self::AnalysisUnavailable(_) | Self::AnalysisMalformed(_) => "analyze",
            Self::PersistenceFailed(_) => "persist",
        }
    }
}

/// Errors that can fail a history read
#[derive(Error, Debug)]
pub enum HistoryError {
    /// The underlying query failed; zero records is never an error
    #[error("Meal history unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl HistoryError {
    /// Short user-facing message for this error
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "Could not load your meal history, please try again",
        }
    }
}

/// A single meal submission.
///
/// The user id is a required, pre-validated input: authentication happened at
/// the API boundary and the orchestrator performs none of its own.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Authenticated owner of the record
    pub user_id: String,
    /// Raw image bytes
    pub image_bytes: Vec<u8>,
    /// Original file name, used in key derivation
    pub image_name: String,
    /// Declared media type of the image
    pub content_type: String,
}

/// Orchestrator turning one image submission into one persisted food record,
/// and reading per-user history back out
pub struct FoodLog {
    images: Arc<dyn ImageStore>,
    analyzer: Arc<dyn NutritionAnalyzer>,
    meals: Arc<dyn MealStore>,
    key_prefix: String,
}

impl FoodLog {
    /// Assemble the orchestrator from its collaborators
    pub fn new(
        images: Arc<dyn ImageStore>,
        analyzer: Arc<dyn NutritionAnalyzer>,
        meals: Arc<dyn MealStore>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            images,
            analyzer,
            meals,
            key_prefix: key_prefix.into(),
        }
    }

    /// Run one meal submission through the pipeline
    #[instrument(skip(self, submission), fields(user_id = %submission.user_id, image = %submission.image_name))]
    pub async fn submit(&self, submission: Submission) -> Result<FoodRecord, SubmitError> {
        let result = self.submit_inner(submission).await;

        match &result {
            Ok(record) => {
                metrics::counter!("meallog.meals.submitted").increment(1);
                info!(
                    record_id = %record.id,
                    calories = record.calories,
                    "Meal submission persisted"
                );
            }
            Err(e) => {
                metrics::counter!("meallog.meals.failed", "stage" => e.stage()).increment(1);
                warn!(error = %e, stage = e.stage(), "Meal submission failed");
            }
        }

        result
    }

    async fn submit_inner(&self, submission: Submission) -> Result<FoodRecord, SubmitError> {
        // Validate before any network call
        if submission.image_bytes.is_empty() {
            return Err(SubmitError::InvalidInput("image payload is empty".to_string()));
        }
        if !submission.content_type.starts_with("image/") {
            return Err(SubmitError::InvalidInput(format!(
                "unsupported media type: {}",
                submission.content_type
            )));
        }

        // Upload
        let key = generate_image_key(
            &self.key_prefix,
            &submission.user_id,
            Utc::now(),
            &submission.image_name,
        );
        self.images
            .put_image(&key, &submission.image_bytes, &submission.content_type)
            .await
            .map_err(SubmitError::UploadFailed)?;

        // Resolve a fetchable URL. A failure here leaves the uploaded bytes
        // orphaned in the bucket; accepted, there is no rollback anywhere in
        // this pipeline.
        let image_url = self
            .images
            .resolve_url(&key)
            .await
            .map_err(SubmitError::UploadFailed)?;

        // Analyze
        let started = Instant::now();
        let estimate = self
            .analyzer
            .analyze(&submission.image_bytes, &submission.content_type)
            .await?;
        metrics::histogram!("meallog.analysis.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        // Persist; the record is returned only after the append succeeds
        self.meals
            .append(&NewFoodRecord {
                user_id: submission.user_id,
                image_url,
                estimate,
                created_at: Utc::now(),
            })
            .await
            .map_err(SubmitError::PersistenceFailed)
    }

    /// Load the full meal history for a user, most recent first
    #[instrument(skip(self))]
    pub async fn load_history(&self, user_id: &str) -> Result<Vec<FoodRecord>, HistoryError> {
        let records = self
            .meals
            .history_for_user(user_id)
            .await
            .map_err(HistoryError::Unavailable)?;

        metrics::counter!("meallog.history.queries").increment(1);
        debug!(count = records.len(), "Loaded meal history");

        Ok(records)
    }

    /// Aggregate nutrition totals for a user since the given timestamp
    #[instrument(skip(self))]
    pub async fn daily_summary(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<NutritionTotals, HistoryError> {
        self.meals
            .totals_for_user(user_id, since)
            .await
            .map_err(HistoryError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{parse_estimate, NutritionEstimate};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeImageStore {
        fail_put: bool,
        fail_resolve: bool,
        puts: AtomicUsize,
    }

    impl FakeImageStore {
        fn ok() -> Self {
            Self {
                fail_put: false,
                fail_resolve: false,
                puts: AtomicUsize::new(0),
            }
        }

        fn failing_put() -> Self {
            Self {
                fail_put: true,
                ..Self::ok()
            }
        }

        fn failing_resolve() -> Self {
            Self {
                fail_resolve: true,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl ImageStore for FakeImageStore {
        async fn put_image(
            &self,
            _key: &str,
            _bytes: &[u8],
            _content_type: &str,
        ) -> anyhow::Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_put {
                return Err(anyhow!("bucket unavailable"));
            }
            Ok(())
        }

        async fn resolve_url(&self, key: &str) -> anyhow::Result<String> {
            if self.fail_resolve {
                return Err(anyhow!("resolution failed"));
            }
            Ok(format!("https://cdn.example.com/{key}"))
        }
    }

    enum AnalyzerMode {
        Estimate(NutritionEstimate),
        /// Runs the real candidate-text parsing/coercion path
        Text(&'static str),
        Unavailable,
    }

    struct FakeAnalyzer {
        mode: AnalyzerMode,
        calls: AtomicUsize,
    }

    impl FakeAnalyzer {
        fn with_mode(mode: AnalyzerMode) -> Self {
            Self {
                mode,
                calls: AtomicUsize::new(0),
            }
        }

        fn ok() -> Self {
            Self::with_mode(AnalyzerMode::Estimate(sample_estimate()))
        }
    }

    #[async_trait]
    impl NutritionAnalyzer for FakeAnalyzer {
        async fn analyze(
            &self,
            _image_bytes: &[u8],
            _content_type: &str,
        ) -> Result<NutritionEstimate, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.mode {
                AnalyzerMode::Estimate(e) => Ok(e.clone()),
                AnalyzerMode::Text(t) => parse_estimate(t),
                AnalyzerMode::Unavailable => {
                    Err(AnalysisError::Unavailable("service down".to_string()))
                }
            }
        }
    }

    struct FakeMealStore {
        fail: bool,
        appends: AtomicUsize,
        records: Mutex<Vec<FoodRecord>>,
    }

    impl FakeMealStore {
        fn ok() -> Self {
            Self {
                fail: false,
                appends: AtomicUsize::new(0),
                records: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn seed(&self, user_id: &str, created_at: DateTime<Utc>) {
            self.records.lock().unwrap().push(FoodRecord {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                image_url: "https://cdn.example.com/seed.jpg".to_string(),
                calories: 100.0,
                protein: 10.0,
                carbs: 20.0,
                fat: 5.0,
                description: "seeded".to_string(),
                created_at,
            });
        }
    }

    #[async_trait]
    impl MealStore for FakeMealStore {
        async fn append(&self, record: &NewFoodRecord) -> anyhow::Result<FoodRecord> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("connection reset"));
            }

            let persisted = FoodRecord {
                id: Uuid::new_v4(),
                user_id: record.user_id.clone(),
                image_url: record.image_url.clone(),
                calories: record.estimate.calories,
                protein: record.estimate.protein,
                carbs: record.estimate.carbs,
                fat: record.estimate.fat,
                description: record.estimate.description.clone(),
                created_at: record.created_at,
            };
            self.records.lock().unwrap().push(persisted.clone());
            Ok(persisted)
        }

        async fn history_for_user(&self, user_id: &str) -> anyhow::Result<Vec<FoodRecord>> {
            if self.fail {
                return Err(anyhow!("connection reset"));
            }

            let mut records: Vec<FoodRecord> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect();
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(records)
        }

        async fn totals_for_user(
            &self,
            user_id: &str,
            since: DateTime<Utc>,
        ) -> anyhow::Result<NutritionTotals> {
            if self.fail {
                return Err(anyhow!("connection reset"));
            }

            let records = self.records.lock().unwrap();
            let matching: Vec<&FoodRecord> = records
                .iter()
                .filter(|r| r.user_id == user_id && r.created_at >= since)
                .collect();

            Ok(NutritionTotals {
                total_calories: matching.iter().map(|r| r.calories).sum(),
                total_protein: matching.iter().map(|r| r.protein).sum(),
                total_carbs: matching.iter().map(|r| r.carbs).sum(),
                total_fat: matching.iter().map(|r| r.fat).sum(),
                meal_count: matching.len() as i64,
            })
        }
    }

    fn sample_estimate() -> NutritionEstimate {
        NutritionEstimate {
            calories: 450.0,
            protein: 25.0,
            carbs: 30.0,
            fat: 12.0,
            description: "grilled chicken".to_string(),
        }
    }

    fn sample_submission() -> Submission {
        Submission {
            user_id: "user-1".to_string(),
            image_bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            image_name: "lunch.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
        }
    }

    fn food_log(
        images: Arc<FakeImageStore>,
        analyzer: Arc<FakeAnalyzer>,
        meals: Arc<FakeMealStore>,
    ) -> FoodLog {
        FoodLog::new(images, analyzer, meals, "food-images")
    }

    #[tokio::test]
    async fn test_submit_returns_persisted_record_for_caller() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::ok());
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images.clone(), analyzer.clone(), meals.clone());

        let record = log.submit(sample_submission()).await.unwrap();

        assert_eq!(record.user_id, "user-1");
        assert!(record.image_url.starts_with("https://cdn.example.com/food-images/user-1/"));
        assert_eq!(record.calories, 450.0);
        assert_eq!(images.puts.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(meals.appends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_image_before_any_call() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::ok());
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images.clone(), analyzer.clone(), meals.clone());

        let err = log
            .submit(Submission {
                image_bytes: vec![],
                ..sample_submission()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::InvalidInput(_)));
        assert_eq!(images.puts.load(Ordering::SeqCst), 0);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(meals.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_non_image_media_type_before_any_call() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::ok());
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images.clone(), analyzer.clone(), meals.clone());

        let err = log
            .submit(Submission {
                image_name: "notes.txt".to_string(),
                content_type: "text/plain".to_string(),
                ..sample_submission()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::InvalidInput(_)));
        assert_eq!(images.puts.load(Ordering::SeqCst), 0);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(meals.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_upload_failure_stops_pipeline() {
        let images = Arc::new(FakeImageStore::failing_put());
        let analyzer = Arc::new(FakeAnalyzer::ok());
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images, analyzer.clone(), meals.clone());

        let err = log.submit(sample_submission()).await.unwrap_err();

        assert!(matches!(err, SubmitError::UploadFailed(_)));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(meals.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_url_resolution_failure_is_upload_failed() {
        let images = Arc::new(FakeImageStore::failing_resolve());
        let analyzer = Arc::new(FakeAnalyzer::ok());
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images, analyzer.clone(), meals.clone());

        let err = log.submit(sample_submission()).await.unwrap_err();

        assert!(matches!(err, SubmitError::UploadFailed(_)));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(meals.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_coerces_partially_malformed_analysis() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::with_mode(AnalyzerMode::Text(
            r#"{"calories":450,"protein":"bad","carbs":30,"fat":12,"description":"grilled chicken"}"#,
        )));
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images, analyzer, meals.clone());

        let record = log.submit(sample_submission()).await.unwrap();

        assert_eq!(record.calories, 450.0);
        assert_eq!(record.protein, 0.0);
        assert_eq!(record.carbs, 30.0);
        assert_eq!(record.fat, 12.0);
        assert_eq!(record.description, "grilled chicken");
    }

    #[tokio::test]
    async fn test_submit_malformed_analysis_appends_nothing() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::with_mode(AnalyzerMode::Text(
            "Sorry, I cannot analyze this image.",
        )));
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images, analyzer, meals.clone());

        let err = log.submit(sample_submission()).await.unwrap_err();

        assert!(matches!(err, SubmitError::AnalysisMalformed(_)));
        assert_eq!(meals.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_unavailable_analysis_appends_nothing() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::with_mode(AnalyzerMode::Unavailable));
        let meals = Arc::new(FakeMealStore::ok());
        let log = food_log(images, analyzer, meals.clone());

        let err = log.submit(sample_submission()).await.unwrap_err();

        assert!(matches!(err, SubmitError::AnalysisUnavailable(_)));
        assert_eq!(meals.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_persistence_failure_surfaces_after_analysis() {
        let images = Arc::new(FakeImageStore::ok());
        let analyzer = Arc::new(FakeAnalyzer::ok());
        let meals = Arc::new(FakeMealStore::failing());
        let log = food_log(images, analyzer.clone(), meals.clone());

        let err = log.submit(sample_submission()).await.unwrap_err();

        assert!(matches!(err, SubmitError::PersistenceFailed(_)));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(meals.appends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_history_empty_is_ok() {
        let log = food_log(
            Arc::new(FakeImageStore::ok()),
            Arc::new(FakeAnalyzer::ok()),
            Arc::new(FakeMealStore::ok()),
        );

        let records = log.load_history("user-without-meals").await.unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_load_history_is_ordered_most_recent_first() {
        let meals = Arc::new(FakeMealStore::ok());
        let t1 = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let t3 = Utc.with_ymd_and_hms(2024, 3, 10, 19, 0, 0).unwrap();
        // Seed out of order
        meals.seed("user-1", t1);
        meals.seed("user-1", t3);
        meals.seed("user-1", t2);
        meals.seed("someone-else", t3);

        let log = food_log(
            Arc::new(FakeImageStore::ok()),
            Arc::new(FakeAnalyzer::ok()),
            meals,
        );

        let records = log.load_history("user-1").await.unwrap();

        let times: Vec<DateTime<Utc>> = records.iter().map(|r| r.created_at).collect();
        assert_eq!(times, vec![t3, t2, t1]);
        assert!(records.iter().all(|r| r.user_id == "user-1"));
    }

    #[tokio::test]
    async fn test_load_history_store_failure_is_unavailable() {
        let log = food_log(
            Arc::new(FakeImageStore::ok()),
            Arc::new(FakeAnalyzer::ok()),
            Arc::new(FakeMealStore::failing()),
        );

        let err = log.load_history("user-1").await.unwrap_err();

        assert!(matches!(err, HistoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_daily_summary_sums_records_since() {
        let meals = Arc::new(FakeMealStore::ok());
        let yesterday = Utc.with_ymd_and_hms(2024, 3, 9, 20, 0, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        meals.seed("user-1", yesterday);
        meals.seed("user-1", today);

        let log = food_log(
            Arc::new(FakeImageStore::ok()),
            Arc::new(FakeAnalyzer::ok()),
            meals,
        );

        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let totals = log.daily_summary("user-1", midnight).await.unwrap();

        assert_eq!(totals.meal_count, 1);
        assert_eq!(totals.total_calories, 100.0);
    }
}
