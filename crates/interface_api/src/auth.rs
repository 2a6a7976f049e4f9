//! Authentication and authorization
//!
//! Bearer tokens carry the caller's party id, role and (for admins) the
//! districts they manage. The auth middleware turns valid claims into a
//! domain [`Actor`]; every workflow guard is then evaluated by the domain.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use core_kernel::PartyId;
use domain_lending::{Actor, Role};

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (party ID)
    pub sub: String,
    /// One of customer, agent, admin
    pub role: String,
    /// Districts an admin manages
    #[serde(default)]
    pub districts: Vec<String>,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
}

/// Auth errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Role not permitted: {0}")]
    RoleNotPermitted(String),
}

impl Claims {
    /// Maps the claims to the acting party
    ///
    /// The system role belongs to the core's own background work and is
    /// never accepted from a token.
    pub fn actor(&self) -> Result<Actor, AuthError> {
        let id = Uuid::parse_str(&self.sub)
            .map(PartyId::from_uuid)
            .map_err(|_| AuthError::InvalidToken)?;
        let role: Role = self
            .role
            .parse()
            .map_err(|_| AuthError::RoleNotPermitted(self.role.clone()))?;

        match role {
            Role::Customer => Ok(Actor::customer(id)),
            Role::Agent => Ok(Actor::agent(id)),
            Role::Admin => Ok(Actor::admin(id, self.districts.clone())),
            Role::System => Err(AuthError::RoleNotPermitted(self.role.clone())),
        }
    }
}

/// Creates a new JWT token for an actor
///
/// # Arguments
///
/// * `actor` - The party the token identifies
/// * `secret` - JWT secret key
/// * `expiration_secs` - Token validity in seconds
pub fn create_token(actor: &Actor, secret: &str, expiration_secs: u64) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(expiration_secs as i64);

    let claims = Claims {
        sub: actor.id.as_uuid().to_string(),
        role: actor.role.as_str().to_string(),
        districts: actor.districts.clone(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::InvalidToken)
}

/// Validates a JWT token
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip_preserves_admin_districts() {
        let admin = Actor::admin(PartyId::new(), vec!["Ernakulam".to_string()]);
        let token = create_token(&admin, SECRET, 60).unwrap();

        let actor = validate_token(&token, SECRET).unwrap().actor().unwrap();
        assert_eq!(actor, admin);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = create_token(&Actor::customer(PartyId::new()), SECRET, 60).unwrap();
        assert!(matches!(validate_token(&token, "other"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_system_role_is_not_accepted_from_tokens() {
        let claims = Claims {
            sub: Uuid::nil().to_string(),
            role: "system".to_string(),
            districts: vec![],
            exp: 0,
            iat: 0,
        };
        assert!(matches!(claims.actor(), Err(AuthError::RoleNotPermitted(_))));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "underwriter".to_string(),
            districts: vec![],
            exp: 0,
            iat: 0,
        };
        assert!(claims.actor().is_err());
    }
}
