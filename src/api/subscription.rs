use axum::{extract::State, Json};
use tracing::info;

use super::auth::AuthUser;
use super::types::{
    CredentialResponse, SubscriptionStatus, UpdateSubscriptionRequest, UsageResponse, UserResponse,
};
use super::{ApiError, ApiResult, AppState, ValidJson};

pub(crate) async fn update_subscription(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ValidJson(request): ValidJson<UpdateSubscriptionRequest>,
) -> ApiResult<Json<UserResponse>> {
    let tier = request.tier().map_err(|reason| ApiError::Malformed {
        field: "subscription".to_string(),
        reason,
    })?;

    let now = state.clock.now();
    let (account, _) = state
        .update_account(&account.id, move |a| {
            a.lapse_if_expired(now);
            a.set_tier(tier, now);
        })
        .await?;

    info!(user = %account.email, tier = %account.subscription_tier, "Subscription updated");
    Ok(Json(UserResponse {
        message: "Subscription updated successfully".to_string(),
        user: account.summary(),
    }))
}

pub(crate) async fn upgrade_to_premium(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
) -> ApiResult<Json<UserResponse>> {
    let now = state.clock.now();
    let (account, _) = state.update_account(&account.id, move |a| a.upgrade(now)).await?;

    info!(user = %account.email, "Upgraded to premium");
    Ok(Json(UserResponse {
        message: "Subscription upgraded successfully".to_string(),
        user: account.summary(),
    }))
}

pub(crate) async fn check_subscription(
    State(state): State<AppState>,
    AuthUser(mut account): AuthUser,
) -> ApiResult<Json<SubscriptionStatus>> {
    state.refresh(&mut account).await?;
    Ok(Json(SubscriptionStatus {
        subscription: account.subscription_tier,
        subscription_end_date: account.subscription_expiry,
    }))
}

/// Hands the recognition key to accounts that still have quota today.
pub(crate) async fn issue_credential(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
) -> ApiResult<Json<CredentialResponse>> {
    let now = state.clock.now();
    let (_, allowed) = state.update_account(&account.id, move |a| a.has_quota(now)).await?;
    if !allowed {
        return Err(ApiError::QuotaExhausted);
    }

    let api_key = state
        .config
        .recognition_api_key
        .clone()
        .ok_or(ApiError::Unavailable("Recognition service is not configured"))?;

    Ok(Json(CredentialResponse {
        api_key,
        host: state.config.recognition_host.clone(),
    }))
}

pub(crate) async fn record_usage(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
) -> ApiResult<Json<UsageResponse>> {
    let now = state.clock.now();
    let (account, _) = state.update_account(&account.id, move |a| a.record_analysis(now)).await?;

    Ok(Json(UsageResponse {
        count: account.daily_analysis_count,
        remaining: account.remaining(),
    }))
}
