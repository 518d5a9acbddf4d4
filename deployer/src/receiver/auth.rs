//! Trigger credential verification
//!
//! A credential is either the shared trigger secret itself or an HS256 JWT
//! signed with it. A JWT may restrict itself to one target via a `target`
//! claim.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::utils::sha256_digest;

/// Claims accepted in trigger JWTs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerClaims {
    /// Restricts the token to a single target
    #[serde(default)]
    pub target: Option<String>,

    /// Caller identity
    #[serde(default)]
    pub sub: Option<String>,

    /// Expiration timestamp
    pub exp: i64,
}

/// What a verified credential allows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grant {
    /// Only this target may be triggered, when set
    pub target: Option<String>,
}

impl Grant {
    pub fn allows(&self, target: &str) -> bool {
        self.target.as_deref().map_or(true, |allowed| allowed == target)
    }
}

/// Verifies trigger credentials against the configured secret
pub struct Authenticator {
    secret: Option<SecretString>,
}

impl Authenticator {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    pub fn verify(&self, credential: Option<&str>) -> Result<Grant, DeployerError> {
        let Some(secret) = &self.secret else {
            return Err(DeployerError::AuthenticationError(
                "no trigger secret configured".to_string(),
            ));
        };
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DeployerError::AuthenticationError("missing credential".to_string()))?;

        let secret = secret.expose_secret();
        if sha256_digest(credential.as_bytes()) == sha256_digest(secret.as_bytes()) {
            return Ok(Grant::default());
        }

        if credential.split('.').count() == 3 {
            let validation = Validation::new(Algorithm::HS256);
            let token = decode::<TriggerClaims>(
                credential,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            )
            .map_err(|e| DeployerError::AuthenticationError(format!("invalid token: {}", e)))?;
            return Ok(Grant {
                target: token.claims.target,
            });
        }

        Err(DeployerError::AuthenticationError(
            "credential mismatch".to_string(),
        ))
    }
}
