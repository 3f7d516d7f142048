use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{ProfileForm, PublicUser},
        extractors::{AuthUser, Credentials, ProfiledUser},
        repo_types::{ProfileUpdate, User},
        services::{authenticate, register, AuthOutcome},
        session::{clear_cookie, SessionKeys},
        views,
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_form).post(login))
        .route("/signup", post(signup))
        .route("/logout", get(logout).post(logout))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).post(complete_profile))
        .route("/me", get(get_me))
}

/// Session cookie plus a redirect to wherever the user belongs next.
fn start_session(state: &AppState, user: &User, created: bool) -> Result<Response, AppError> {
    let keys = &state.sessions;
    let token = keys.issue(&user.username)?;
    let target = if created || !user.is_profile_complete() {
        "/profile"
    } else {
        "/"
    };
    Ok((
        [(header::SET_COOKIE, keys.cookie(&token))],
        Redirect::to(target),
    )
        .into_response())
}

pub async fn login_form() -> Html<String> {
    views::login_page(None)
}

/// Browser form posts get the sign-in page back with the problem shown; JSON
/// clients get a JSON error body.
fn credential_failure(e: AppError, json: bool) -> Response {
    match e {
        AppError::Validation(msg) if !json => {
            (StatusCode::BAD_REQUEST, views::login_page(Some(&msg))).into_response()
        }
        AppError::InvalidCredentials if json => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid credentials" })),
        )
            .into_response(),
        other => other.into_response(),
    }
}

#[instrument(skip(state, creds), fields(username = %creds.form.username))]
pub async fn login(State(state): State<AppState>, creds: Credentials) -> Response {
    let Credentials { form, json } = creds;
    let outcome = match authenticate(&state, &form.username, &form.password).await {
        Ok(outcome) => outcome,
        Err(e) => return credential_failure(e, json),
    };
    let created = matches!(outcome, AuthOutcome::Created(_));
    start_session(&state, outcome.user(), created).unwrap_or_else(IntoResponse::into_response)
}

#[instrument(skip(state, creds), fields(username = %creds.form.username))]
pub async fn signup(State(state): State<AppState>, creds: Credentials) -> Response {
    let Credentials { form, json } = creds;
    match register(&state, &form.username, &form.password).await {
        Ok(user) => start_session(&state, &user, true).unwrap_or_else(IntoResponse::into_response),
        Err(e) => credential_failure(e, json),
    }
}

pub async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_cookie())],
        Redirect::to("/login"),
    )
}

/// Current profile; reachable while the profile is still incomplete.
#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .ok_or_else(|| AppError::Session("unknown user".into()))?;
    Ok(Json(PublicUser::from(user)))
}

#[instrument(skip(state, form))]
pub async fn complete_profile(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Form(form): Form<ProfileForm>,
) -> Result<Redirect, AppError> {
    let update = ProfileUpdate::from(form);
    let user = User::update_profile(&state.db, &username, &update)
        .await?
        .ok_or_else(|| AppError::Session("unknown user".into()))?;

    if user.is_profile_complete() {
        info!(user_id = user.id, %username, "profile completed");
        Ok(Redirect::to("/"))
    } else {
        info!(user_id = user.id, %username, "profile saved; still incomplete");
        Ok(Redirect::to("/profile"))
    }
}

#[instrument(skip_all)]
pub async fn get_me(ProfiledUser(user): ProfiledUser) -> Json<PublicUser> {
    Json(PublicUser::from(user))
}
