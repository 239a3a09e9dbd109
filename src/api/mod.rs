use axum::{
    async_trait,
    routing::{get, post, put},
    Router,
    Json,
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{CorsLayer, Any};
use tracing::{error, info, warn};
use validator::{Validate, ValidationErrors};

use crate::account::UserAccount;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::database::{Database, DatabaseError};

pub mod auth;
pub mod subscription;
pub mod types;

use auth::{hash_password_blocking, new_session_token, verify_password_blocking, AuthUser};
use types::{ApiResponse, LoginRequest, LoginResponse, RegisterRequest, UserResponse};

#[derive(Clone)]
pub struct AppState {
    pub(crate) db: Arc<Database>,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: Arc::new(db),
            config: Arc::new(config),
            clock,
        }
    }

    /// Read-modify-write of one account in a single database call.
    pub(crate) async fn update_account<F, R>(&self, id: &str, apply: F) -> ApiResult<(UserAccount, R)>
    where
        F: FnOnce(&mut UserAccount) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.db
            .update_user(id, apply)
            .await?
            .ok_or(ApiError::NotFound("User not found"))
    }

    /// Applies a lazy premium lapse and persists it if anything changed.
    pub(crate) async fn refresh(&self, account: &mut UserAccount) -> ApiResult<()> {
        let now = self.clock.now();
        if account.clone().lapse_if_expired(now) {
            let (fresh, _) = self.update_account(&account.id, move |a| a.lapse_if_expired(now)).await?;
            info!(user = %fresh.email, "Premium subscription expired, reverted to free");
            *account = fresh;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(#[from] ValidationErrors),
    #[error("Invalid request body")]
    Malformed { field: String, reason: String },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("Daily analysis quota exhausted")]
    QuotaExhausted,
    #[error("{0}")]
    Unavailable(&'static str),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed {
            field: "body".to_string(),
            reason: rejection.body_text(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        let reason = e.to_string();
        let field = reason
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
            .unwrap_or("body")
            .to_string();
        ApiError::Malformed { field, reason }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Malformed { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn field_errors(errors: &ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid {}", field))
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(errors) => ApiResponse {
                message: self.to_string(),
                errors: field_errors(errors),
            },
            ApiError::Malformed { field, reason } => ApiResponse {
                message: self.to_string(),
                errors: BTreeMap::from([(field.clone(), vec![reason.clone()])]),
            },
            ApiError::Database(_) | ApiError::Internal(_) => {
                error!("{}", self);
                ApiResponse {
                    message: "Server error".to_string(),
                    ..Default::default()
                }
            }
            other => ApiResponse {
                message: other.to_string(),
                ..Default::default()
            },
        };

        (status, Json(body)).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// JSON body that is decoded and validated before the handler runs. Every
/// rejection renders as a 400 `ApiResponse`.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<serde_json::Value>::from_request(req, state).await?;
        let body: T = serde_json::from_value(value)?;
        body.validate()?;
        Ok(ValidJson(body))
    }
}

/// Create and configure the API router
pub fn create_api(state: AppState) -> Router {
    info!("Setting up API server with CORS...");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/user", get(user_handler))
        .route("/subscription", put(subscription::update_subscription))
        .route("/subscription/upgrade", post(subscription::upgrade_to_premium))
        .route("/subscription/status", get(subscription::check_subscription))
        .route("/recognition/credential", get(subscription::issue_credential))
        .route("/usage", post(subscription::record_usage))
        .layer(ConcurrencyLimitLayer::new(state.config.max_concurrent_requests))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> Json<ApiResponse> {
    Json(ApiResponse {
        message: "Server is running and healthy".to_string(),
        ..Default::default()
    })
}

async fn register_handler(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let password_hash = hash_password_blocking(request.password).await?;
    let account = UserAccount::new(&request.email, password_hash, state.clock.now());
    if !state.db.create_user(&account).await? {
        warn!(email = %account.email, "Registration for existing email");
        return Err(ApiError::Conflict("User already exists"));
    }

    info!(user = %account.email, "Registered new account");
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            message: "User registered successfully".to_string(),
            user: account.summary(),
        }),
    ))
}

async fn login_handler(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let mut account = state
        .db
        .find_user_by_email(&request.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password_blocking(request.password, account.password_hash.clone()).await? {
        return Err(invalid());
    }

    let token = new_session_token();
    state.db.create_session(&token, &account.id, state.clock.now()).await?;
    state.refresh(&mut account).await?;

    info!(user = %account.email, "Login succeeded");
    Ok(Json(LoginResponse {
        token,
        user: account.summary(),
    }))
}

async fn user_handler(
    State(state): State<AppState>,
    AuthUser(mut account): AuthUser,
) -> ApiResult<Json<crate::account::AccountSummary>> {
    state.refresh(&mut account).await?;
    Ok(Json(account.summary()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    pub(crate) async fn test_state() -> (AppState, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap());
        let config = ServerConfig {
            recognition_api_key: Some("server-held-key".to_string()),
            ..ServerConfig::default()
        };
        let db = Database::in_memory().await.unwrap();
        (AppState::new(db, config, Arc::new(clock.clone())), clock)
    }

    pub(crate) async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub(crate) async fn register_and_login(router: &Router, email: &str) -> String {
        let creds = json!({"email": email, "password": "secret123"});
        let (status, _) = call(router, Method::POST, "/register", None, Some(creds.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(router, Method::POST, "/login", None, Some(creds)).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_register_returns_summary() {
        let (state, _) = test_state().await;
        let router = create_api(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/register",
            None,
            Some(json!({"email": "Cook@Example.com", "password": "secret123"})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "cook@example.com");
        assert_eq!(body["user"]["subscription"], "free");
        assert!(body["user"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_register_validation_reports_fields() {
        let (state, _) = test_state().await;
        let router = create_api(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/register",
            None,
            Some(json!({"email": "not-an-email", "password": "123"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"]["email"][0], "Please include a valid email");
        assert_eq!(
            body["errors"]["password"][0],
            "Please enter a password with 6 or more characters"
        );
    }

    #[tokio::test]
    async fn test_missing_field_is_a_structured_400() {
        let (state, _) = test_state().await;
        let router = create_api(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/register",
            None,
            Some(json!({"email": "cook@example.com"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request body");
        assert!(body["errors"]["password"][0]
            .as_str()
            .unwrap()
            .contains("missing field `password`"));
    }

    #[tokio::test]
    async fn test_broken_json_is_a_structured_400() {
        let (state, _) = test_state().await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"email\": "))
            .unwrap();

        let response = create_api(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Invalid request body");
        assert!(body["errors"]["body"][0].is_string());
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (state, _) = test_state().await;
        let router = create_api(state);
        register_and_login(&router, "cook@example.com").await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/register",
            None,
            Some(json!({"email": "COOK@example.com", "password": "another1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "User already exists");
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let (state, _) = test_state().await;
        let router = create_api(state);
        register_and_login(&router, "cook@example.com").await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/login",
            None,
            Some(json!({"email": "cook@example.com", "password": "wrong-one"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid credentials");

        let (status, _) = call(
            &router,
            Method::POST,
            "/login",
            None,
            Some(json!({"email": "nobody@example.com", "password": "secret123"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_user_requires_token() {
        let (state, _) = test_state().await;
        let router = create_api(state);

        let (status, _) = call(&router, Method::GET, "/user", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&router, Method::GET, "/user", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = register_and_login(&router, "cook@example.com").await;
        let (status, body) = call(&router, Method::GET, "/user", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "cook@example.com");
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state().await;
        let (status, body) = call(&create_api(state), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Server is running and healthy");
    }
}
