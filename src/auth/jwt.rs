use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::GatewayError;

use super::Claims;

/// Verifies the signed identity token presented during the handshake.
///
/// Tokens are HS256-signed with the shared gateway secret; signature and expiry
/// checks come from `Validation::default()`, issuer/audience only when configured.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, GatewayError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| GatewayError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn create_test_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(sub: &str, expires_in: i64) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + expires_in,
            iat: chrono::Utc::now().timestamp(),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_valid_token() {
        let config = create_test_config();
        let verifier = TokenVerifier::new(&config);

        let token = create_test_token(&claims_for("user-123", 3600), &config.secret);
        let result = verifier.verify(&token);

        assert!(result.is_ok());
        let claims = result.unwrap();
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.user_id(), "user-123");
    }

    #[test]
    fn test_invalid_token() {
        let config = create_test_config();
        let verifier = TokenVerifier::new(&config);

        let result = verifier.verify("invalid-token");
        assert!(result.is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = create_test_config();
        let verifier = TokenVerifier::new(&config);

        let token = create_test_token(&claims_for("user-123", -3600), &config.secret);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = create_test_config();
        let verifier = TokenVerifier::new(&config);

        let token = create_test_token(&claims_for("user-123", 3600), "a-different-secret");
        assert!(verifier.verify(&token).is_err());
    }
}
