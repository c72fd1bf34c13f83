//! Bearer token authentication
//!
//! Tokens are HS256 JWTs issued by the account service. `sub` carries the user id
//! and `role` one of `customer`, `seller`, `admin`, `fulfillment`.

use crate::error::{AppError, AuthError};
use crate::middleware::error::request_id_from;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    Seller,
    Admin,
    Fulfillment,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Seller => "seller",
            UserRole::Admin => "admin",
            UserRole::Fulfillment => "fulfillment",
        }
    }

    /// Staff may update tracking and read any order
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Fulfillment)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl FromStr for UserRole {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "customer" | "user" => Ok(UserRole::Customer),
            "seller" => Ok(UserRole::Seller),
            "admin" => Ok(UserRole::Admin),
            "fulfillment" => Ok(UserRole::Fulfillment),
            other => Err(AuthError::InvalidToken {
                reason: format!("unknown role '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: usize,
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn require_staff(&self) -> Result<(), AuthError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                reason: "admin or fulfillment role required".to_string(),
            })
        }
    }

    /// Sellers, and admins acting for their own listings
    pub fn require_seller(&self) -> Result<(), AuthError> {
        if matches!(self.role, UserRole::Seller | UserRole::Admin) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                reason: "seller role required".to_string(),
            })
        }
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                reason: "admin role required".to_string(),
            })
        }
    }
}

#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            AuthError::InvalidToken {
                reason: e.to_string(),
            }
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken {
            reason: "subject is not a user id".to_string(),
        })?;
        let role = match data.claims.role.as_deref() {
            Some(role) => UserRole::from_str(role)?,
            None => UserRole::Customer,
        };

        Ok(AuthUser { user_id, role })
    }

    /// Sign a token for `user_id`; used by operational tooling and tests.
    pub fn issue(&self, user_id: Uuid, role: UserRole, ttl_secs: i64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            role: Some(role.as_str().to_string()),
            exp: (Utc::now().timestamp() + ttl_secs).max(0) as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            AuthError::InvalidToken {
                reason: e.to_string(),
            }
        })
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = request_id_from(&parts.headers);
        let reject = |err: AuthError| {
            let err = AppError::from(err);
            match &request_id {
                Some(id) => err.with_request_id(id.clone()),
                None => err,
            }
        };

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject(AuthError::MissingToken))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| reject(AuthError::MissingToken))?;

        let verifier = Arc::<JwtVerifier>::from_ref(state);
        verifier.verify(token).map_err(reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-16";

    #[test]
    fn issued_token_round_trips_user_and_role() {
        let verifier = JwtVerifier::new(SECRET);
        let user_id = Uuid::new_v4();
        let token = verifier
            .issue(user_id, UserRole::Fulfillment, 3600)
            .expect("token should sign");

        let user = verifier.verify(&token).expect("token should verify");
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, UserRole::Fulfillment);
        assert!(user.require_staff().is_ok());
        assert!(user.require_admin().is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = JwtVerifier::new("another-secret-of-16+");
        let token = issuer
            .issue(Uuid::new_v4(), UserRole::Customer, 3600)
            .expect("token should sign");

        let verifier = JwtVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier
            .issue(Uuid::new_v4(), UserRole::Customer, -3600)
            .expect("token should sign");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn customers_are_not_staff() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Customer,
        };
        assert!(matches!(
            user.require_staff(),
            Err(AuthError::Forbidden { .. })
        ));
    }
}
