use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use vectorsmith_core::{Actor, Role, UserId};

use crate::app::errors::json_error;

/// Pre-validated user id set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// `user` or `admin`; absent means `user`.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Turn the gateway's identity headers into an [`Actor`] request extension.
///
/// Credentials are never checked here; a missing or unparsable identity is a
/// 401.
pub async fn identity_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let actor = match actor_from_headers(req.headers()) {
        Ok(actor) => actor,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message),
    };

    req.extensions_mut().insert(actor);
    next.run(req).await
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, String> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| format!("missing {USER_ID_HEADER} header"))?
        .to_str()
        .map_err(|_| format!("{USER_ID_HEADER} is not valid text"))?
        .parse::<UserId>()
        .map_err(|e| e.to_string())?;

    let role = match headers.get(USER_ROLE_HEADER) {
        None => Role::User,
        Some(value) => value
            .to_str()
            .map_err(|_| format!("{USER_ROLE_HEADER} is not valid text"))?
            .parse::<Role>()
            .map_err(|e| e.to_string())?,
    };

    Ok(Actor::new(user_id, role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn role_defaults_to_user() {
        let user = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor, Actor::user(user));
    }

    #[test]
    fn admin_role_is_read() {
        let user = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("Admin"));

        assert!(actor_from_headers(&headers).unwrap().is_admin());
    }

    #[test]
    fn bad_identity_is_rejected() {
        assert!(actor_from_headers(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(actor_from_headers(&headers).is_err());

        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&UserId::new().to_string()).unwrap());
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("root"));
        assert!(actor_from_headers(&headers).is_err());
    }
}
