//! Native Google API client — direct HTTP via reqwest.
//!
//! Token format is compatible with the token.json written by Google's
//! Python OAuth library, so an existing token can be dropped in as-is.
//!
//! Modules:
//! - auth: OAuth2 browser consent flow + token acquisition
//! - gmail: Gmail API v1 (list / fetch / mark-read)
//! - sheets: Sheets API v4 (header setup / duplicate check / append)

pub mod auth;
pub mod gmail;
pub mod sheets;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Google OAuth2 scopes used by mailsheet.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/spreadsheets",
];

// ============================================================================
// Token types — compatible with Python's google-auth token format
// ============================================================================

/// OAuth2 token payload persisted to token.json.
///
/// Field names match what Python's `Credentials.to_json()` produces. Both
/// `token` and `access_token` are accepted on read for compat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    /// The access token (Python writes this as "token")
    #[serde(alias = "access_token")]
    pub token: String,
    /// The refresh token (long-lived, used to get new access tokens)
    pub refresh_token: Option<String>,
    /// Token endpoint URL
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// OAuth2 client ID
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorized scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (ISO 8601)
    #[serde(default)]
    pub expiry: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// OAuth2 client credentials from credentials.json (Desktop App type).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentials {
    pub installed: InstalledAppCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledAppCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Credentials not found at {0}")]
    CredentialsNotFound(PathBuf),
    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OAuth flow cancelled")]
    FlowCancelled,
    #[error("Invalid credentials format: {0}")]
    InvalidCredentials(String),
}

impl ApiError {
    /// Build an error from a non-success API response body.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            ApiError::AuthExpired
        } else {
            ApiError::Api {
                status: status.as_u16(),
                message: body,
            }
        }
    }
}

// ============================================================================
// Token I/O
// ============================================================================

/// Path to the persisted OAuth token.
pub fn token_path() -> PathBuf {
    crate::config::data_dir().join("token.json")
}

/// Path to the OAuth client credentials file (Desktop App type, downloaded
/// from Google Cloud Console).
pub fn credentials_path() -> PathBuf {
    crate::config::data_dir().join("credentials.json")
}

/// Load the persisted token, if any.
pub fn load_token() -> Result<GoogleToken, ApiError> {
    let path = token_path();
    if !path.exists() {
        return Err(ApiError::TokenNotFound(path));
    }
    let content = std::fs::read_to_string(&path)?;
    let token: GoogleToken = serde_json::from_str(&content)?;
    Ok(token)
}

/// Persist the token to disk, 0600 on unix.
pub fn save_token(token: &GoogleToken) -> Result<(), ApiError> {
    let path = token_path();

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let content = serde_json::to_string_pretty(token)?;
    std::fs::write(&path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Load client credentials from credentials.json.
pub fn load_credentials() -> Result<ClientCredentials, ApiError> {
    let path = credentials_path();
    if !path.exists() {
        return Err(ApiError::CredentialsNotFound(path));
    }
    let content = std::fs::read_to_string(&path)?;
    let creds: ClientCredentials = serde_json::from_str(&content)
        .map_err(|e| ApiError::InvalidCredentials(format!("{}: {}", path.display(), e)))?;
    Ok(creds)
}

// ============================================================================
// Token expiry + refresh
// ============================================================================

/// Check if a token is expired based on its expiry field.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true, // No expiry = assume expired, try refresh
        Some(expiry_str) => {
            // Python stores expiry as "2026-02-08T12:00:00.000000Z" or similar
            match chrono::DateTime::parse_from_rfc3339(&expiry_str.replace('Z', "+00:00"))
                .or_else(|_| chrono::DateTime::parse_from_rfc3339(expiry_str))
            {
                Ok(expiry) => {
                    // Consider expired if within 60 seconds of expiry
                    let now = chrono::Utc::now();
                    expiry <= now + chrono::Duration::seconds(60)
                }
                Err(_) => true, // Can't parse = assume expired
            }
        }
    }
}

/// Refresh an access token using the refresh token.
///
/// Returns an updated GoogleToken with new access token and expiry,
/// persisted to disk.
pub async fn refresh_access_token(token: &GoogleToken) -> Result<GoogleToken, ApiError> {
    let refresh_token = token
        .refresh_token
        .as_ref()
        .ok_or(ApiError::AuthExpired)?;

    let client = reqwest::Client::new();

    let mut form = vec![
        ("client_id", token.client_id.as_str()),
        ("refresh_token", refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = token.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = client.post(&token.token_uri).form(&form).send().await?;
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        let lowered = body_text.to_lowercase();
        if (status.as_u16() == 400 || status.as_u16() == 401)
            && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
        {
            return Err(ApiError::AuthExpired);
        }
        return Err(ApiError::RefreshFailed(format!(
            "HTTP {}: {}",
            status, body_text
        )));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| ApiError::RefreshFailed("No access_token in response".into()))?;
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let mut new_token = token.clone();
    new_token.token = access_token.to_string();
    new_token.expiry = Some(expiry.to_rfc3339());

    save_token(&new_token)?;

    Ok(new_token)
}

// ============================================================================
// Tests
// ============================================================================
