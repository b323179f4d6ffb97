//! Identity provider client.
//!
//! Authentication is fully delegated to a hosted identity toolkit API; this
//! service never stores credentials and treats issued tokens as opaque. The
//! provider's error codes are mapped to a small typed taxonomy with short
//! user-facing messages.

use crate::config::IdentityConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// Authenticated user reference issued by the identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id
    pub id: String,
    /// Email address
    pub email: String,
}

/// Result of a successful sign-in or sign-up
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    /// The authenticated identity
    pub identity: Identity,
    /// Bearer token for subsequent API calls
    pub id_token: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
}

/// Errors surfaced by the identity provider
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Email already in use")]
    EmailInUse,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Password too weak")]
    WeakPassword,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Sign-in method not enabled")]
    OperationNotAllowed,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Identity provider unreachable: {0}")]
    Transport(String),
}

impl AuthError {
    /// Map a provider error code to a typed variant.
    /// The provider sometimes suffixes codes with detail
    /// ("WEAK_PASSWORD : Password should be at least 6 characters"),
    /// so match on the leading token.
    fn from_code(code: &str) -> Self {
        let head = code.split_whitespace().next().unwrap_or(code);

        match head {
            "EMAIL_EXISTS" => Self::EmailInUse,
            "INVALID_EMAIL" => Self::InvalidEmail,
            "WEAK_PASSWORD" => Self::WeakPassword,
            "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => Self::UserNotFound,
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => Self::InvalidCredentials,
            "OPERATION_NOT_ALLOWED" => Self::OperationNotAllowed,
            "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_DISABLED" => Self::InvalidToken,
            _ => Self::Provider(head.to_string()),
        }
    }

    /// Short user-facing message for this error
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::EmailInUse => "This email is already in use",
            Self::InvalidEmail => "Invalid email format",
            Self::WeakPassword => "Password must be at least 6 characters",
            Self::UserNotFound => "User not found",
            Self::InvalidCredentials => "Incorrect email or password",
            Self::OperationNotAllowed => "This sign-in method is not enabled",
            Self::InvalidToken => "Your session has expired, please sign in again",
            Self::Provider(_) | Self::Transport(_) => "Something went wrong, please try again",
        }
    }
}

/// Client for the hosted identity toolkit API
pub struct IdentityClient {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: String,
}

impl IdentityClient {
    /// Create a new identity client from configuration
    pub fn new(config: &IdentityConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Register a new user with email and password
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let response = self
            .post_account_action("accounts:signUp", email, password)
            .await?;

        debug!(user_id = %response.local_id, "User registered");

        Ok(response.into_session())
    }

    /// Sign in an existing user with email and password
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let response = self
            .post_account_action("accounts:signInWithPassword", email, password)
            .await?;

        debug!(user_id = %response.local_id, "User signed in");

        Ok(response.into_session())
    }

    /// Verify a bearer token and resolve the identity behind it
    #[instrument(skip(self, id_token))]
    pub async fn verify_token(&self, id_token: &str) -> Result<Identity, AuthError> {
        let url = format!("{}/accounts:lookup?key={}", self.endpoint_url, self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "idToken": id_token }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or(AuthError::InvalidToken)?;

        Ok(Identity {
            id: user.local_id,
            email: user.email,
        })
    }

    async fn post_account_action(
        &self,
        action: &str,
        email: &str,
        password: &str,
    ) -> Result<PasswordAuthResponse, AuthError> {
        let url = format!("{}/{}?key={}", self.endpoint_url, action, self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true
            }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))
    }
}

/// Extract the provider error code from a non-success response
async fn error_from_response(response: reqwest::Response) -> AuthError {
    let status = response.status();

    match response.json::<ProviderErrorResponse>().await {
        Ok(ProviderErrorResponse {
            error: Some(detail),
        }) => AuthError::from_code(&detail.message),
        _ => AuthError::Provider(format!("status {status}")),
    }
}

/// Error envelope returned by the identity toolkit on a non-success status
#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    #[serde(default)]
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PasswordAuthResponse {
    #[serde(rename = "localId")]
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(rename = "idToken")]
    id_token: String,
    /// The provider sends token lifetime as a string of seconds
    #[serde(rename = "expiresIn", default)]
    expires_in: String,
}

impl PasswordAuthResponse {
    fn into_session(self) -> AuthSession {
        let expires_in = self.expires_in.parse().unwrap_or(3600);

        AuthSession {
            identity: Identity {
                id: self.local_id,
                email: self.email,
            },
            id_token: self.id_token,
            expires_in,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
struct LookupUser {
    #[serde(rename = "localId")]
    local_id: String,
    #[serde(default)]
    email: String,
}
