// Identity assertion validation.
//
// The HTTP auth backend (session/JWT) lives upstream; what reaches the
// gateway is a short-lived HS256 token asserting who the user is. The
// gateway validates the signature and expiry and reconstructs the
// `UserIdentity` — it never authenticates credentials itself.

use anyhow::{anyhow, bail, Context};
use crewline_common::types::UserIdentity;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const IDENTITY_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    username: String,
    active: bool,
    superuser: bool,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct IdentityTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("auth secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_identity_token(&self, identity: &UserIdentity) -> anyhow::Result<String> {
        self.issue_identity_token_at(identity, current_unix_timestamp()?)
    }

    fn issue_identity_token_at(
        &self,
        identity: &UserIdentity,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = IdentityClaims {
            sub: identity.user_id.to_string(),
            username: identity.username.clone(),
            active: identity.is_active,
            superuser: identity.is_superuser,
            iat: issued_at,
            exp: issued_at + IDENTITY_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode identity token")
    }

    pub fn validate_identity_token(&self, token: &str) -> anyhow::Result<UserIdentity> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode identity token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| anyhow!("identity token subject '{}' is not a UUID", claims.sub))?;

        Ok(UserIdentity {
            user_id,
            username: claims.username,
            is_active: claims.active,
            is_superuser: claims.superuser,
        })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
