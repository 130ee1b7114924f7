//! Identity of the caller, as established by the authentication layer.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

/// Actor used when no authenticated identity is attached to the request.
pub const DEFAULT_ACTOR: &str = "root";

/// Authenticated actor. The auth middleware inserts it as a request
/// extension; handlers extract it like any other argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ActorId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ActorId>()
            .filter(|actor| !actor.0.is_empty())
            .cloned()
            .unwrap_or_else(|| ActorId(DEFAULT_ACTOR.to_string())))
    }
}
