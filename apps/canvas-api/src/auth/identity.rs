//! Bearer-token verification against the platform identity service.

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::jwks::JwksClient;
use crate::error::ApiError;

/// Claims carried in an identity-signed bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The resolved identity behind a verified bearer token.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub display_name: String,
}

/// Validate a bearer token and resolve the user behind it.
///
/// Checks:
///   1. Signature via the identity JWKS
///   2. `exp` (jsonwebtoken handles this)
///   3. `aud` matches this service's audience
///   4. `iss` matches the configured identity origin
pub async fn verify_token(
    token: &str,
    jwks: &JwksClient,
    expected_audience: &str,
    expected_issuer: &str,
) -> Result<VerifiedIdentity, ApiError> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| {
        tracing::debug!(?e, "token header decode failed");
        ApiError::unauthorized("Invalid token")
    })?;

    let kid = header
        .kid
        .ok_or_else(|| ApiError::unauthorized("Token missing kid"))?;

    let key = jwks.get_key(&kid).await?;

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_audience(&[expected_audience]);
    validation.set_issuer(&[expected_issuer]);

    let token_data =
        jsonwebtoken::decode::<IdentityClaims>(token, &key, &validation).map_err(|e| {
            tracing::debug!(?e, "token validation failed");
            ApiError::unauthorized("Invalid or expired token")
        })?;

    let claims = token_data.claims;
    Ok(VerifiedIdentity {
        display_name: display_name_for(&claims),
        user_id: claims.sub,
    })
}

/// Resolve the display name: the `name` claim, falling back to the email
/// local-part, falling back to the subject itself.
fn display_name_for(claims: &IdentityClaims) -> String {
    if let Some(name) = claims.name.as_deref() {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    if let Some(email) = claims.email.as_deref() {
        if let Some(local) = email.split('@').next() {
            if !local.is_empty() {
                return local.to_string();
            }
        }
    }
    claims.sub.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(name: Option<&str>, email: Option<&str>) -> IdentityClaims {
        IdentityClaims {
            iss: "http://localhost:4001".to_string(),
            sub: "usr_01ABCDEF".to_string(),
            aud: "atelier-canvas".to_string(),
            iat: 0,
            exp: 0,
            name: name.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn display_name_prefers_name_claim() {
        let c = claims(Some("Ada Lovelace"), Some("ada@example.com"));
        assert_eq!(display_name_for(&c), "Ada Lovelace");
    }

    #[test]
    fn display_name_falls_back_to_email_local_part() {
        let c = claims(None, Some("ada@example.com"));
        assert_eq!(display_name_for(&c), "ada");
    }

    #[test]
    fn display_name_falls_back_to_subject() {
        let c = claims(None, None);
        assert_eq!(display_name_for(&c), "usr_01ABCDEF");
    }

    #[test]
    fn empty_name_claim_is_skipped() {
        let c = claims(Some(""), Some("grace@example.com"));
        assert_eq!(display_name_for(&c), "grace");
    }
}
