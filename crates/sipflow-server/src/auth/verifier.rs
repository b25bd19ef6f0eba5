//! Bearer token verification

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use thiserror::Error;

use super::Claims;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("invalid token claims: {0}")]
    Claims(#[from] serde_json::Error),

    #[error("unauthorized")]
    EmailNotVerified,

    #[error("attributes not found in token, claim path: {0}")]
    AttributesNotFound(String),

    #[error("attributes are not part of a multivalue claim, claim path: {0}")]
    AttributesNotMultivalue(String),
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `Ok(None)` means authentication is disabled.
    async fn verify(&self, token: &str) -> Result<Option<Claims>, VerifyError>;
}

/// Verifier used when authentication is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTokenVerifier;

#[async_trait]
impl TokenVerifier for NoopTokenVerifier {
    async fn verify(&self, _token: &str) -> Result<Option<Claims>, VerifyError> {
        Ok(None)
    }
}

/// Attribute based access control settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbacConfig {
    pub enabled: bool,
    /// Path to the multivalue claim, e.g. `realm_access.roles`.
    pub claim_path: String,
    /// Separator for nested claim paths; empty means a top level claim.
    pub claim_path_separator: String,
    /// Only values with this prefix are kept, with the prefix removed.
    pub claim_value_prefix: String,
}

impl AbacConfig {
    /// Extract attributes from decoded token claims.
    pub fn parse_attributes(&self, claims: &Value) -> Result<Option<Vec<String>>, VerifyError> {
        if !self.enabled {
            return Ok(None);
        }

        let keys: Vec<&str> = if self.claim_path_separator.is_empty() {
            vec![self.claim_path.as_str()]
        } else {
            self.claim_path
                .split(self.claim_path_separator.as_str())
                .collect()
        };

        let mut current = claims;
        for key in keys {
            current = current
                .as_object()
                .and_then(|o| o.get(key))
                .ok_or_else(|| VerifyError::AttributesNotFound(self.claim_path.clone()))?;
        }

        let values = current
            .as_array()
            .ok_or_else(|| VerifyError::AttributesNotMultivalue(self.claim_path.clone()))?;

        Ok(Some(
            values
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|v| v.strip_prefix(self.claim_value_prefix.as_str()))
                .map(str::to_string)
                .collect(),
        ))
    }
}

/// Verifies signed JWTs issued by the configured provider.
pub struct JwtTokenVerifier {
    key: DecodingKey,
    validation: Validation,
    abac: AbacConfig,
}

impl JwtTokenVerifier {
    pub fn new(
        key: DecodingKey,
        algorithm: Algorithm,
        issuer: Option<&str>,
        audience: Option<&str>,
        abac: AbacConfig,
    ) -> Self {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Self {
            key,
            validation,
            abac,
        }
    }

    pub fn hs256(
        secret: &[u8],
        issuer: Option<&str>,
        audience: Option<&str>,
        abac: AbacConfig,
    ) -> Self {
        Self::new(
            DecodingKey::from_secret(secret),
            Algorithm::HS256,
            issuer,
            audience,
            abac,
        )
    }

    pub fn rs256_pem(
        pem: &[u8],
        issuer: Option<&str>,
        audience: Option<&str>,
        abac: AbacConfig,
    ) -> Result<Self, VerifyError> {
        Ok(Self::new(
            DecodingKey::from_rsa_pem(pem)?,
            Algorithm::RS256,
            issuer,
            audience,
            abac,
        ))
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<Claims>, VerifyError> {
        let data = decode::<Value>(token, &self.key, &self.validation)?;
        let mut claims: Claims = serde_json::from_value(data.claims.clone())?;
        if !claims.email_verified {
            return Err(VerifyError::EmailNotVerified);
        }
        claims.attributes = self.abac.parse_attributes(&data.claims)?;
        Ok(Some(claims))
    }
}
