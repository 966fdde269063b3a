use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use crate::api::middleware::CurrentUser;
use crate::api::state::AppState;
use crate::config::Config;
use crate::crypto::{generate_token, hash_password, verify_password, TOKEN_COOKIE};
use crate::db::{User, UserRepository};
use crate::error::AppError;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub profile_pic: String,
}

/// Normalize and sanity-check an email address
fn validate_email(email: &str) -> Result<String, AppError> {
    let trimmed = email.trim().to_lowercase();

    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(trimmed),
        _ => Err(AppError::BadRequest("Invalid email format".to_string())),
    }
}

/// Build the session cookie: httpOnly, sameSite=strict, secure in production
pub fn session_cookie(token: String, config: &Config) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(config.production)
        .max_age(time::Duration::seconds(config.token_max_age().num_seconds()))
        .build()
}

fn issue_session(jar: CookieJar, user: &User, config: &Config) -> Result<CookieJar, AppError> {
    let token = generate_token(&user.id, &config.jwt_secret, config.token_max_age())?;
    Ok(jar.add(session_cookie(token, config)))
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<User>), AppError> {
    let full_name = req.full_name.trim();
    if full_name.is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest("All fields are required".to_string()));
    }

    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let email = validate_email(&req.email)?;

    if UserRepository::get_by_email(&state.db, &email).await?.is_some() {
        return Err(AppError::BadRequest("Email already exists".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let user = UserRepository::create(&state.db, &email, full_name, &password_hash).await?;
    tracing::info!(user_id = %user.id, "user signed up");

    let jar = issue_session(jar, &user, &state.config)?;
    Ok((StatusCode::CREATED, jar, Json(user)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<User>), AppError> {
    let invalid = || AppError::BadRequest("Invalid credentials".to_string());

    let email = validate_email(&req.email).map_err(|_| invalid())?;
    let user = UserRepository::get_by_email(&state.db, &email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash)? {
        tracing::debug!(user_id = %user.id, "login rejected");
        return Err(invalid());
    }

    let jar = issue_session(jar, &user, &state.config)?;
    Ok((jar, Json(user)))
}

/// POST /api/auth/logout
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    let jar = jar.remove(Cookie::build(TOKEN_COOKIE).path("/"));
    (jar, Json(serde_json::json!({"message": "Logged out successfully"})))
}

/// GET /api/auth/check (requires auth)
pub async fn check(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<User> {
    Json(user)
}

/// PUT /api/auth/update-profile (requires auth)
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    let profile_pic = req.profile_pic.trim();
    if profile_pic.is_empty() {
        return Err(AppError::BadRequest("Profile pic is required".to_string()));
    }

    let updated = UserRepository::update_profile_pic(&state.db, &user.id, profile_pic)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(updated))
}
