use crate::analysis::NutritionEstimate;
use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A persisted food record: one analyzed meal bound to a user, an image URL
/// and a creation time. Records are append-only; nothing in this service
/// updates or deletes them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FoodRecord {
    /// Store-assigned record ID
    pub id: Uuid,
    /// Owning user (opaque identity provider id)
    pub user_id: String,
    /// Resolved URL of the uploaded food image
    pub image_url: String,
    /// Estimated calories (kcal)
    pub calories: f64,
    /// Estimated protein (grams)
    pub protein: f64,
    /// Estimated carbohydrates (grams)
    pub carbs: f64,
    /// Estimated fat (grams)
    pub fat: f64,
    /// Short description of the dish
    pub description: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// A food record about to be persisted; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewFoodRecord {
    /// Owning user (opaque identity provider id)
    pub user_id: String,
    /// Resolved URL of the uploaded food image
    pub image_url: String,
    /// The coerced nutrition estimate
    pub estimate: NutritionEstimate,
    /// Creation timestamp, assigned by the orchestrator
    pub created_at: DateTime<Utc>,
}

/// Aggregate nutrition totals for a user over a time window
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NutritionTotals {
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub meal_count: i64,
}

/// Record store seam used by the orchestrator
#[async_trait]
pub trait MealStore: Send + Sync {
    /// Append a new food record and return the persisted row
    async fn append(&self, record: &NewFoodRecord) -> Result<FoodRecord>;

    /// All records for a user, most recent first
    async fn history_for_user(&self, user_id: &str) -> Result<Vec<FoodRecord>>;

    /// Aggregate nutrition totals for a user since a timestamp
    async fn totals_for_user(&self, user_id: &str, since: DateTime<Utc>)
        -> Result<NutritionTotals>;
}

/// PostgreSQL-backed meal store
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MealStore for PgRecordStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id))]
    async fn append(&self, record: &NewFoodRecord) -> Result<FoodRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO food_records (
                id, user_id, image_url, calories, protein,
                carbs, fat, description, created_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9
            )
            "#,
        )
        .bind(id)
        .bind(&record.user_id)
        .bind(&record.image_url)
        .bind(record.estimate.calories)
        .bind(record.estimate.protein)
        .bind(record.estimate.carbs)
        .bind(record.estimate.fat)
        .bind(&record.estimate.description)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert food record")?;

        debug!(record_id = %id, "Food record appended");

        Ok(FoodRecord {
            id,
            user_id: record.user_id.clone(),
            image_url: record.image_url.clone(),
            calories: record.estimate.calories,
            protein: record.estimate.protein,
            carbs: record.estimate.carbs,
            fat: record.estimate.fat,
            description: record.estimate.description.clone(),
            created_at: record.created_at,
        })
    }

    #[instrument(skip(self))]
    async fn history_for_user(&self, user_id: &str) -> Result<Vec<FoodRecord>> {
        let records = sqlx::query_as::<_, FoodRecord>(
            r#"
            SELECT id, user_id, image_url, calories, protein,
                   carbs, fat, description, created_at
            FROM food_records
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query food history")?;

        Ok(records)
    }

    #[instrument(skip(self))]
    async fn totals_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<NutritionTotals> {
        let totals: NutritionTotals = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(calories), 0) as total_calories,
                COALESCE(SUM(protein), 0) as total_protein,
                COALESCE(SUM(carbs), 0) as total_carbs,
                COALESCE(SUM(fat), 0) as total_fat,
                COUNT(*) as meal_count
            FROM food_records
            WHERE user_id = $1 AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate nutrition totals")?;

        Ok(totals)
    }
}
