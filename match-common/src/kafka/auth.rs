//! # Auth
//!
//! Short-lived tokens for the log's OAUTHBEARER security layer. librdkafka
//! asks for a fresh token when a connection is set up and again before the
//! current one expires, through [`crate::kafka::OAuthContext`].
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::Engine;
use thiserror::Error;
use tokio::runtime::Handle;
use url::Url;

/// Validity window of the MSK IAM presigned connect URL.
pub const MSK_TOKEN_LIFETIME: Duration = Duration::from_secs(900);

const MSK_SIGNING_NAME: &str = "kafka-cluster";
const MSK_USER_AGENT: &str = "match-events-msk-iam-signer/0.1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub principal: String,
    pub lifetime: Duration,
}

impl Token {
    /// Absolute expiry in milliseconds since the epoch, as librdkafka wants it.
    pub fn expires_at_ms(&self, now: SystemTime) -> i64 {
        let expiry = now + self.lifetime;
        expiry
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("no AWS credentials provider configured")]
    NoCredentialsProvider,
    #[error("failed to load AWS credentials: {0}")]
    Credentials(String),
    #[error("failed to sign token request: {0}")]
    Signing(String),
}

/// Source of authentication tokens for broker connections.
pub trait TokenProvider: Send + Sync {
    fn fetch_token(&self) -> Result<Token, TokenError>;
}

/// Hands out the same token every time. Meant for tests and local brokers.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: Token,
}

impl StaticTokenProvider {
    pub fn new(value: &str, principal: &str, lifetime: Duration) -> Self {
        Self {
            token: Token {
                value: value.to_owned(),
                principal: principal.to_owned(),
                lifetime,
            },
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn fetch_token(&self) -> Result<Token, TokenError> {
        Ok(self.token.clone())
    }
}

/// Builds AWS MSK IAM tokens: a SigV4 query-signed `kafka-cluster:Connect`
/// URL, base64url encoded without padding.
pub struct MskIamTokenProvider {
    region: String,
    credentials: SharedCredentialsProvider,
    runtime: Handle,
}

impl MskIamTokenProvider {
    /// Resolve credentials through the default AWS provider chain. Must be
    /// called from within a tokio runtime.
    pub async fn from_env(region: &str) -> Result<Self, TokenError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;

        let credentials = sdk_config
            .credentials_provider()
            .ok_or(TokenError::NoCredentialsProvider)?;

        Ok(Self::new(region, credentials, Handle::current()))
    }

    pub fn new(region: &str, credentials: SharedCredentialsProvider, runtime: Handle) -> Self {
        Self {
            region: region.to_owned(),
            credentials,
            runtime,
        }
    }

    fn connect_url(&self) -> Result<Url, TokenError> {
        Url::parse(&format!(
            "https://kafka.{}.amazonaws.com/?Action=kafka-cluster%3AConnect",
            self.region
        ))
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    // librdkafka calls us from its own threads, and sometimes from inside the
    // runtime while polling: resolve on a fresh thread so block_on never nests.
    fn load_credentials(&self) -> Result<aws_credential_types::Credentials, TokenError> {
        let provider = self.credentials.clone();
        let runtime = self.runtime.clone();

        std::thread::spawn(move || runtime.block_on(provider.provide_credentials()))
            .join()
            .map_err(|_| TokenError::Credentials("credentials lookup panicked".to_owned()))?
            .map_err(|e| TokenError::Credentials(e.to_string()))
    }

    fn presign(&self, identity: &Identity, now: SystemTime) -> Result<String, TokenError> {
        let mut url = self.connect_url()?;
        let host = url
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| TokenError::Signing("connect url has no host".to_owned()))?;

        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(MSK_TOKEN_LIFETIME);

        let signing_params = v4::SigningParams::builder()
            .identity(identity)
            .region(&self.region)
            .name(MSK_SIGNING_NAME)
            .time(now)
            .settings(settings)
            .build()
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        let signable = SignableRequest::new(
            "GET",
            url.as_str(),
            std::iter::once(("host", host.as_str())),
            SignableBody::UnsignedPayload,
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &signing_params.into())
            .map_err(|e| TokenError::Signing(e.to_string()))?
            .into_parts();

        {
            let mut query = url.query_pairs_mut();
            for (name, value) in instructions.params() {
                query.append_pair(name, value);
            }
            query.append_pair("User-Agent", MSK_USER_AGENT);
        }

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(url.as_str()))
    }
}

impl TokenProvider for MskIamTokenProvider {
    fn fetch_token(&self) -> Result<Token, TokenError> {
        let credentials = self.load_credentials()?;
        let principal = credentials.access_key_id().to_owned();
        let expiry = credentials.expiry();
        let identity = Identity::new(credentials, expiry);

        let value = self.presign(&identity, SystemTime::now())?;

        Ok(Token {
            value,
            principal,
            lifetime: MSK_TOKEN_LIFETIME,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::Credentials;

    #[test]
    fn static_provider_returns_fixed_token() {
        let provider = StaticTokenProvider::new("abc", "tester", Duration::from_secs(60));

        let token = provider.fetch_token().unwrap();
        assert_eq!(token.value, "abc");
        assert_eq!(token.principal, "tester");
        assert_eq!(token.lifetime, Duration::from_secs(60));
    }

    #[test]
    fn expiry_is_absolute_millis() {
        let token = Token {
            value: "abc".to_owned(),
            principal: "tester".to_owned(),
            lifetime: Duration::from_secs(900),
        };
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert_eq!(token.expires_at_ms(now), 1_700_000_900_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn msk_token_is_a_presigned_connect_url() {
        let credentials = Credentials::new("AKIDEXAMPLE", "secret", None, None, "test");
        let provider = MskIamTokenProvider::new(
            "eu-central-1",
            SharedCredentialsProvider::new(credentials),
            Handle::current(),
        );

        let token = provider.fetch_token().unwrap();
        assert_eq!(token.principal, "AKIDEXAMPLE");
        assert_eq!(token.lifetime, MSK_TOKEN_LIFETIME);
        assert!(!token.value.contains('='));

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&token.value)
            .unwrap();
        let url = Url::parse(std::str::from_utf8(&decoded).unwrap()).unwrap();
        assert_eq!(url.host_str(), Some("kafka.eu-central-1.amazonaws.com"));

        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("Action").as_deref(), Some("kafka-cluster:Connect"));
        assert_eq!(get("X-Amz-Expires").as_deref(), Some("900"));
        assert_eq!(get("User-Agent").as_deref(), Some(MSK_USER_AGENT));
        assert!(get("X-Amz-Signature").is_some());
        assert!(get("X-Amz-Credential")
            .unwrap()
            .contains("/eu-central-1/kafka-cluster/aws4_request"));
    }
}
