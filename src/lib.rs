//! Meallog Service
//!
//! Food photo nutrition analysis service. An authenticated user uploads a
//! photo of a meal; the service stores the image in S3, asks a hosted
//! vision/language model for a nutrition estimate, persists the result as an
//! append-only per-user food record in PostgreSQL, and serves the history
//! back out, most recent first.
//!
//! ## Features
//!
//! - **Delegated identity**: password sign-up/sign-in and token verification
//!   against a hosted identity toolkit API; this service never stores
//!   credentials
//! - **Tolerant analysis parsing**: model output must be JSON, but individual
//!   missing or malformed fields coerce to defaults instead of failing the
//!   submission
//! - **Append-only history**: one record per successful submission, never
//!   updated or deleted, queried per user in descending creation order
//!
//! ## Architecture
//!
//! ```text
//! HTTP API                    S3 Bucket                 PostgreSQL
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ auth /       │           │ food-images/ │          │ food_records │
//! │ meals /      │           │   {user}/    │          └──────────────┘
//! │ summary      │           │   {date}/    │                 ▲
//! └──────────────┘           └──────────────┘                 │
//!        │                          ▲                         │
//!        ▼                          │ upload + resolve URL    │ append/query
//! ┌──────────────┐                  │                         │
//! │ Food-record  │──────────────────┼─────────────────────────┘
//! │ Orchestrator │                  │
//! └──────────────┘                  │
//!        │ analyze (base64 image)   │
//!        ▼                          │
//! ┌──────────────┐           ┌──────────────┐
//! │ Vision model │           │ Identity     │
//! │ API          │           │ toolkit API  │
//! └──────────────┘           └──────────────┘
//! ```

pub mod analysis;
pub mod api;
pub mod config;
pub mod identity;
pub mod image_store;
pub mod orchestrator;
pub mod record_store;

pub use analysis::{AnalysisError, GeminiAnalyzer, NutritionAnalyzer, NutritionEstimate};
pub use api::{start_api_server, AppState};
pub use config::Config;
pub use identity::{AuthError, AuthSession, Identity, IdentityClient};
pub use image_store::{ImageStore, S3ImageStore};
pub use orchestrator::{FoodLog, HistoryError, Submission, SubmitError};
pub use record_store::{FoodRecord, MealStore, NewFoodRecord, NutritionTotals, PgRecordStore};
