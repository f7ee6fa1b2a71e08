use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::DicomError;

pub const HEALTHCARE_SCOPE: &str = "https://www.googleapis.com/auth/cloud-healthcare";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const EXPIRY_MARGIN_SECS: i64 = 60;

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, DicomError>;
}

impl<T: TokenProvider + ?Sized> TokenProvider for Box<T> {
    fn token(&self) -> Result<String, DicomError> {
        (**self).token()
    }
}

/// A bearer token obtained out of band, e.g. `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Result<Self, DicomError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(DicomError::Authentication(
                "access token is empty".to_string(),
            ));
        }
        Ok(Self { token })
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Result<String, DicomError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, DicomError> {
        let content =
            fs::read_to_string(path).map_err(|_| DicomError::CredentialsRead(path.to_path_buf()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, DicomError> {
        serde_json::from_str(content).map_err(|err| {
            DicomError::Authentication(format!("invalid service account JSON: {err}"))
        })
    }

    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// OAuth2 service-account flow: signs a JWT assertion and exchanges it for an access token.
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn from_file(path: &Path) -> Result<Self, DicomError> {
        Self::new(ServiceAccountKey::from_file(path)?)
    }

    pub fn new(key: ServiceAccountKey) -> Result<Self, DicomError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|err| DicomError::Authentication(format!("invalid private key: {err}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DicomError::Authentication(err.to_string()))?;
        Ok(Self {
            key,
            encoding_key,
            client,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, DicomError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: HEALTHCARE_SCOPE,
            aud: self.key.token_uri(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|err| DicomError::Authentication(format!("failed to sign assertion: {err}")))
    }

    fn exchange(&self) -> Result<CachedToken, DicomError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        tracing::debug!(client_email = %self.key.client_email, "requesting access token");
        let response = self
            .client
            .post(self.key.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .map_err(|err| DicomError::Authentication(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "token exchange failed".to_string());
            return Err(DicomError::Authentication(format!(
                "token endpoint returned status {status}: {message}"
            )));
        }
        let payload: TokenResponse = response
            .json()
            .map_err(|err| DicomError::Authentication(err.to_string()))?;
        let lifetime = payload.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        Ok(CachedToken {
            value: payload.access_token,
            expires_at: now + chrono::Duration::seconds(lifetime),
        })
    }
}

impl TokenProvider for ServiceAccountTokenProvider {
    fn token(&self) -> Result<String, DicomError> {
        let mut guard = self
            .cached
            .lock()
            .map_err(|_| DicomError::Authentication("token cache poisoned".to_string()))?;
        if let Some(cached) = guard.as_ref() {
            if is_fresh(cached.expires_at, Utc::now()) {
                return Ok(cached.value.clone());
            }
        }
        let fresh = self.exchange()?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }
}

fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
}

/// Picks the provider from the CLI/config inputs: an explicit token wins over a key file.
pub fn provider_from_inputs(
    access_token: Option<String>,
    service_account: Option<PathBuf>,
) -> Result<Box<dyn TokenProvider>, DicomError> {
    if let Some(token) = access_token {
        return Ok(Box::new(StaticTokenProvider::new(token)?));
    }
    let path = service_account.ok_or(DicomError::MissingParameter(
        "service account JSON path or access token",
    ))?;
    Ok(Box::new(ServiceAccountTokenProvider::from_file(&path)?))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use jsonwebtoken::{DecodingKey, Validation};

    use super::*;
    use crate::testing::serve;

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/service_account_pub.pem");
    const CLIENT_EMAIL: &str = "svc@p1.iam.gserviceaccount.com";

    fn fixture_provider(token_uri: Option<String>) -> ServiceAccountTokenProvider {
        ServiceAccountTokenProvider::new(ServiceAccountKey {
            client_email: CLIENT_EMAIL.to_string(),
            private_key: PRIVATE_KEY.to_string(),
            private_key_id: Some("kid1".to_string()),
            token_uri,
        })
        .unwrap()
    }

    fn decode_assertion(jwt: &str, audience: &str) -> jsonwebtoken::TokenData<serde_json::Value> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        jsonwebtoken::decode(jwt, &key, &validation).unwrap()
    }

    #[test]
    fn assertion_claims_target_healthcare_scope() {
        let provider = fixture_provider(None);
        let now = Utc::now();

        let decoded = decode_assertion(&provider.assertion(now).unwrap(), DEFAULT_TOKEN_URI);

        assert_eq!(decoded.header.alg, Algorithm::RS256);
        assert_eq!(decoded.header.kid.as_deref(), Some("kid1"));
        let claims = decoded.claims;
        assert_eq!(claims["iss"], CLIENT_EMAIL);
        assert_eq!(claims["scope"], HEALTHCARE_SCOPE);
        assert_eq!(claims["aud"], DEFAULT_TOKEN_URI);
        let iat = claims["iat"].as_i64().unwrap();
        assert_eq!(iat, now.timestamp());
        assert_eq!(claims["exp"].as_i64().unwrap() - iat, ASSERTION_LIFETIME_SECS);
    }

    #[test]
    fn assertion_audience_follows_token_uri() {
        let provider = fixture_provider(Some("https://oauth.example.test/token".to_string()));

        let decoded = decode_assertion(
            &provider.assertion(Utc::now()).unwrap(),
            "https://oauth.example.test/token",
        );

        assert_eq!(decoded.claims["aud"], "https://oauth.example.test/token");
    }

    #[test]
    fn exchange_posts_jwt_bearer_grant_and_caches() {
        let (url, requests) = serve(vec![(
            200,
            r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#.to_string(),
        )]);
        let provider = fixture_provider(Some(format!("{url}/token")));

        assert_eq!(provider.token().unwrap(), "ya29.fresh");
        assert_eq!(provider.token().unwrap(), "ya29.fresh");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /token"));
        assert!(
            requests[0].contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer")
        );
        assert!(requests[0].contains("assertion="));
    }

    #[test]
    fn exchange_rejection_is_authentication_error() {
        let (url, _requests) = serve(vec![(400, r#"{"error":"invalid_grant"}"#.to_string())]);
        let provider = fixture_provider(Some(format!("{url}/token")));

        let err = provider.token().unwrap_err();

        assert_matches!(err, DicomError::Authentication(message) if message.contains("400"));
    }

    #[test]
    fn fresh_cached_token_is_reused() {
        let provider = fixture_provider(Some("http://127.0.0.1:9/token".to_string()));
        *provider.cached.lock().unwrap() = Some(CachedToken {
            value: "ya29.cached".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(600),
        });

        assert_eq!(provider.token().unwrap(), "ya29.cached");
    }

    #[test]
    fn static_token_rejects_blank() {
        assert_matches!(
            StaticTokenProvider::new("   "),
            Err(DicomError::Authentication(_))
        );
        let provider = StaticTokenProvider::new(" ya29.token\n").unwrap();
        assert_eq!(provider.token().unwrap(), "ya29.token");
    }

    #[test]
    fn freshness_respects_margin() {
        let now = Utc::now();
        assert!(is_fresh(now + chrono::Duration::seconds(600), now));
        assert!(!is_fresh(now + chrono::Duration::seconds(30), now));
        assert!(!is_fresh(now - chrono::Duration::seconds(1), now));
    }

    #[test]
    fn service_account_key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email":"svc@p1.iam.gserviceaccount.com","private_key":"pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri(), DEFAULT_TOKEN_URI);
    }

    #[test]
    fn service_account_rejects_bad_key() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email":"svc@p1.iam.gserviceaccount.com","private_key":"not a pem"}"#,
        )
        .unwrap();
        assert_matches!(
            ServiceAccountTokenProvider::new(key).err(),
            Some(DicomError::Authentication(_))
        );
    }

    #[test]
    fn missing_credentials_file() {
        let err = ServiceAccountKey::from_file(Path::new("/nonexistent/key.json")).unwrap_err();
        assert_matches!(err, DicomError::CredentialsRead(_));
    }

    #[test]
    fn provider_requires_some_credential() {
        assert_matches!(
            provider_from_inputs(None, None).err(),
            Some(DicomError::MissingParameter(_))
        );
        assert!(provider_from_inputs(Some("tok".to_string()), None).is_ok());
    }
}
