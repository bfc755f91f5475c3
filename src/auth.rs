use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::User;
use crate::repo::UserRepo;
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(
    feature = "postgres-store",
    derive(sqlx::Type),
    sqlx(type_name = "user_role", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User email.
    pub sub: String,
    pub exp: usize,
}

fn signing_algorithm() -> Algorithm {
    env::var("JWT_ALGORITHM")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Algorithm::HS256)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let mut validation = Validation::new(signing_algorithm());
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Create a bearer token whose subject is the user's email.
pub fn create_token(email: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let expire_minutes: i64 = env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::minutes(expire_minutes))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims { sub: email.to_string(), exp: expiration };

    encode(
        &Header::new(signing_algorithm()),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn prehash(password: &str) -> String {
    BASE64.encode(Sha256::digest(password.as_bytes()))
}

/// bcrypt over a base64-encoded SHA-256 digest, sidestepping bcrypt's
/// 72-byte input cap.
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(prehash(password), bcrypt::DEFAULT_COST)
}

/// Accepts both the prehashed scheme and legacy raw-bcrypt hashes.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    if bcrypt::verify(prehash(password), hashed).unwrap_or(false) {
        return true;
    }
    bcrypt::verify(password, hashed).unwrap_or(false)
}

/// Extractor yielding the authenticated [`User`] behind the bearer token.
pub struct Auth(pub User);

impl FromRequest for Auth {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header, then load the subject
        // from the repository so role and skill changes apply immediately.
        let bearer = BearerAuth::from_request(req, pl).into_inner();
        let state = req.app_data::<web::Data<AppState>>().cloned();
        Box::pin(async move {
            let bearer =
                bearer.map_err(|_| ApiError::Unauthorized("Authorization required".into()))?;
            let claims = decode_jwt(bearer.token())
                .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials".into()))?;
            let state = state.ok_or_else(ApiError::internal)?;
            let user = state
                .repo
                .get_user_by_email(&claims.sub)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;
            Ok(Auth(user))
        })
    }
}
