//! Interactive login against Azure AD.
//!
//! # Design
//! `IdentityProvider` is the seam the bootstrap calls when no stored
//! credential exists. The shipped implementation runs the OAuth2 device
//! code grant: the user is shown a code and a URL, signs in from any
//! browser, and the provider polls the token endpoint until the grant is
//! issued, refused, or expires. `DeviceCodeFlow` is the sans-IO half;
//! `DeviceCodeProvider` drives it through a `Transport`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::types::TokenGrant;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const FORM: &str = "application/x-www-form-urlencoded";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Parameters of one login: which app, which tenant, which resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub client_id: String,
    /// e.g. `https://login.microsoftonline.com/<tenant>`
    pub authority: String,
    /// Only meaningful for browser-redirect flows; the device-code grant
    /// ignores it.
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
}

pub trait IdentityProvider: Send + Sync {
    fn login(&self, request: &LoginRequest) -> Result<TokenGrant, ApiError>;
}

/// What the user has to do to finish signing in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_expires_in() -> u64 {
    900
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct DeviceCodeForm<'a> {
    client_id: &'a str,
    scope: String,
}

#[derive(Serialize)]
struct TokenForm<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    device_code: &'a str,
}

/// Result of one poll of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    SlowDown,
    Granted(TokenGrant),
}

/// Builds and parses the device-code grant requests.
#[derive(Debug, Clone)]
pub struct DeviceCodeFlow {
    request: LoginRequest,
}

impl DeviceCodeFlow {
    pub fn new(request: LoginRequest) -> Self {
        Self { request }
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/oauth2/v2.0/{name}",
            self.request.authority.trim_end_matches('/')
        )
    }

    pub fn build_authorize(&self) -> Result<HttpRequest, ApiError> {
        let form = DeviceCodeForm {
            client_id: &self.request.client_id,
            scope: self.request.scopes.join(" "),
        };
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: self.endpoint("devicecode"),
            headers: vec![("Content-Type".to_string(), FORM.to_string())],
            body: Some(body),
        })
    }

    pub fn parse_authorize(&self, response: HttpResponse) -> Result<DeviceAuthorization, ApiError> {
        if !response.is_success() {
            return Err(token_error(&response));
        }
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    pub fn build_poll(&self, authorization: &DeviceAuthorization) -> Result<HttpRequest, ApiError> {
        let form = TokenForm {
            grant_type: DEVICE_CODE_GRANT,
            client_id: &self.request.client_id,
            device_code: &authorization.device_code,
        };
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: self.endpoint("token"),
            headers: vec![("Content-Type".to_string(), FORM.to_string())],
            body: Some(body),
        })
    }

    pub fn parse_poll(&self, response: HttpResponse) -> Result<PollOutcome, ApiError> {
        if response.is_success() {
            let grant: TokenGrant = serde_json::from_str(&response.body)
                .map_err(|e| ApiError::DeserializationError(e.to_string()))?;
            return Ok(PollOutcome::Granted(grant));
        }
        match serde_json::from_str::<TokenError>(&response.body) {
            Ok(err) if err.error == "authorization_pending" => Ok(PollOutcome::Pending),
            Ok(err) if err.error == "slow_down" => Ok(PollOutcome::SlowDown),
            _ => Err(token_error(&response)),
        }
    }
}

fn token_error(response: &HttpResponse) -> ApiError {
    match serde_json::from_str::<TokenError>(&response.body) {
        Ok(err) => match err.error.as_str() {
            "access_denied" | "authorization_declined" => {
                ApiError::AuthFlow("sign-in was declined".to_string())
            }
            "expired_token" | "code_expired" => {
                ApiError::AuthFlow("device code expired before sign-in completed".to_string())
            }
            other => ApiError::AuthFlow(match err.error_description {
                Some(description) => format!("{other}: {description}"),
                None => other.to_string(),
            }),
        },
        Err(_) => ApiError::HttpError {
            status: response.status,
            body: response.body.clone(),
        },
    }
}

type Prompt = Box<dyn Fn(&DeviceAuthorization) + Send + Sync>;

/// Runs the device-code grant over a `Transport`.
pub struct DeviceCodeProvider {
    transport: Arc<dyn Transport>,
    prompt: Prompt,
    poll_interval: Option<Duration>,
}

impl DeviceCodeProvider {
    /// `prompt` is called once with the code the user has to enter.
    pub fn new(
        transport: Arc<dyn Transport>,
        prompt: impl Fn(&DeviceAuthorization) + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            prompt: Box::new(prompt),
            poll_interval: None,
        }
    }

    /// Override the server-suggested poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

impl IdentityProvider for DeviceCodeProvider {
    fn login(&self, request: &LoginRequest) -> Result<TokenGrant, ApiError> {
        let flow = DeviceCodeFlow::new(request.clone());
        let authorization = flow.parse_authorize(self.transport.execute(&flow.build_authorize()?)?)?;
        (self.prompt)(&authorization);

        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = self
            .poll_interval
            .unwrap_or_else(|| Duration::from_secs(authorization.interval));
        let poll = flow.build_poll(&authorization)?;

        loop {
            if Instant::now() >= deadline {
                return Err(ApiError::AuthFlow(
                    "device code expired before sign-in completed".to_string(),
                ));
            }
            std::thread::sleep(interval);
            match flow.parse_poll(self.transport.execute(&poll)?)? {
                PollOutcome::Granted(grant) => {
                    tracing::info!(token_type = %grant.token_type, "device code sign-in completed");
                    return Ok(grant);
                }
                PollOutcome::Pending => continue,
                PollOutcome::SlowDown => interval += SLOW_DOWN_STEP,
            }
        }
    }
}
