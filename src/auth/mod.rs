//! Caller identity. Tokens are issued elsewhere; this module only verifies
//! them and turns their claims into an [`Actor`].

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::entities::order_status_history::ActorRole;
use crate::errors::ErrorResponse;

/// Header carrying the anonymous session token for guest carts.
pub const SESSION_HEADER: &str = "x-session-token";

/// JWT claims accepted by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: ActorRole,
    /// Restaurants a vendor manages; empty for other roles.
    #[serde(default)]
    pub restaurants: Vec<Uuid>,
    pub exp: i64,
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
    #[serde(default)]
    pub restaurant_ids: Vec<Uuid>,
}

impl Actor {
    pub fn customer(id: Uuid) -> Self {
        Self {
            id,
            role: ActorRole::Customer,
            restaurant_ids: Vec::new(),
        }
    }

    pub fn vendor(id: Uuid, restaurant_ids: Vec<Uuid>) -> Self {
        Self {
            id,
            role: ActorRole::Vendor,
            restaurant_ids,
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self {
            id,
            role: ActorRole::Admin,
            restaurant_ids: Vec::new(),
        }
    }

    /// The service itself, acting on gateway callbacks.
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: ActorRole::System,
            restaurant_ids: Vec::new(),
        }
    }

    pub fn is_customer(&self) -> bool {
        self.role == ActorRole::Customer
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }

    pub fn manages_restaurant(&self, restaurant_id: Uuid) -> bool {
        self.role == ActorRole::Vendor && self.restaurant_ids.contains(&restaurant_id)
    }

    /// Id recorded in audit rows; `None` for the system actor.
    pub fn audit_id(&self) -> Option<Uuid> {
        (self.role != ActorRole::System).then_some(self.id)
    }
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            restaurant_ids: claims.restaurants,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Role not allowed on external tokens")]
    ForbiddenRole,
    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: "unauthorized".to_string(),
            message: self.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

/// HS256 token verification.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding: Arc<DecodingKey>,
    encoding: Arc<EncodingKey>,
    validation: Arc<Validation>,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(Validation::new(Algorithm::HS256)),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Actor, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if data.claims.role == ActorRole::System {
            return Err(AuthError::ForbiddenRole);
        }
        Ok(data.claims.into())
    }

    /// Signs claims with the shared secret. Used by operational tooling and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

/// Extractor for a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedActor
where
    S: Send + Sync,
    JwtVerifier: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = JwtVerifier::from_ref(state);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let actor = verifier.verify(token)?;
        debug!(actor_id = %actor.id, role = %actor.role, "authenticated request");
        Ok(AuthenticatedActor(actor))
    }
}

/// Extractor that never rejects: a verified actor if a valid bearer token is
/// present, plus the guest session token header if any.
#[derive(Debug, Clone, Default)]
pub struct MaybeActor {
    pub actor: Option<Actor>,
    pub session_token: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeActor
where
    S: Send + Sync,
    JwtVerifier: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let actor = match AuthenticatedActor::from_request_parts(parts, state).await {
            Ok(AuthenticatedActor(actor)) => Some(actor),
            Err(AuthError::MissingToken) => None,
            Err(e) => return Err(e),
        };
        let session_token = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        Ok(MaybeActor {
            actor,
            session_token,
        })
    }
}
