use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use tracing::{debug, warn};

use super::{
    dto::CredentialsForm,
    repo_types::User,
    session::{SessionKeys, SESSION_COOKIE},
};
use crate::{error::AppError, state::AppState};

/// Session token from the `nimbus_session` cookie, or a bearer header.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty());
    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::to_string)
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Username and password from either a urlencoded form or a JSON body.
pub struct Credentials {
    pub form: CredentialsForm,
    /// The client sent JSON and expects JSON errors back.
    pub json: bool,
}

#[async_trait]
impl<S> FromRequest<S> for Credentials
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_json(req.headers()) {
            let Json(form) = Json::<CredentialsForm>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Credentials { form, json: true })
        } else {
            let Form(form) = Form::<CredentialsForm>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Credentials { form, json: false })
        }
    }
}

/// Username carried by a valid session.
pub struct AuthUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<SessionKeys>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::Session("missing session".into()))?;
        let keys = Arc::<SessionKeys>::from_ref(state);
        match keys.verify(&token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(e) => {
                warn!(error = %e, "invalid or expired session");
                Err(AppError::Session("invalid or expired session".into()))
            }
        }
    }
}

/// Signed-in user whose profile is complete. Anyone else is sent to finish
/// their profile first.
pub struct ProfiledUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for ProfiledUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(username) = AuthUser::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let user = User::find_by_username(&state.db, &username)
            .await
            .map_err(|e| AppError::from(e).into_response())?
            .ok_or_else(|| {
                warn!(%username, "session for unknown user");
                AppError::Session("unknown user".into()).into_response()
            })?;

        if !user.is_profile_complete() {
            debug!(%username, "profile incomplete; redirecting");
            return Err(Redirect::to("/profile").into_response());
        }
        Ok(ProfiledUser(user))
    }
}
