//! Matrix homeserver client: login, token check and TURN credentials.
//!
//! Talks to the client-server API under `/_matrix/client/r0`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::VoipTestError;
use crate::tester::turn::TurnConfig;

const CLIENT_API_PREFIX: &str = "/_matrix/client/r0";
const DEVICE_DISPLAY_NAME: &str = "VoIP Tester";

/// Standard Matrix error body.
#[derive(Debug, Default, Deserialize)]
struct MatrixError {
    errcode: Option<String>,
    error: Option<String>,
}

impl MatrixError {
    async fn from_response(resp: reqwest::Response) -> Self {
        resp.json().await.unwrap_or_default()
    }

    /// `errcode error status`, as reported for unexpected responses.
    fn describe(&self, status: reqwest::StatusCode) -> String {
        format!(
            "{} {} {}",
            self.errcode.as_deref().unwrap_or("undefined"),
            self.error.as_deref().unwrap_or("undefined"),
            status.as_u16()
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Set by homeservers that issue expiring tokens.
    #[serde(default)]
    pub expires_in_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct TurnServerResponse {
    #[serde(default)]
    uris: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    ttl: Option<u64>,
}

/// Authenticated client for one homeserver.
pub struct HomeserverClient {
    http: reqwest::Client,
    base: String,
    access_token: Option<String>,
}

impl HomeserverClient {
    pub fn new(homeserver_url: &str, timeout: Duration) -> Result<Self, VoipTestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoipTestError::Unknown(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base: format!(
                "{}{}",
                homeserver_url.trim_end_matches('/'),
                CLIENT_API_PREFIX
            ),
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base, path);
        tracing::debug!("Homeserver {} {}", method, url);
        let req = self.http.request(method, &url);
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, VoipTestError> {
        req.send().await.map_err(|e| {
            VoipTestError::FailedHomeserverConnection(format!("{}: {}", self.base, e))
        })
    }

    /// Password login. On success the client keeps the new access token.
    pub async fn login(
        &mut self,
        user_id: &str,
        password: &str,
    ) -> Result<LoginResponse, VoipTestError> {
        let body = serde_json::json!({
            "type": "m.login.password",
            "identifier": {
                "type": "m.id.user",
                "user": user_id,
            },
            "password": password,
            "initial_device_display_name": DEVICE_DISPLAY_NAME,
        });

        let resp = self
            .send(self.request(reqwest::Method::POST, "/login").json(&body))
            .await?;

        let status = resp.status();
        match status.as_u16() {
            200 => {
                let login: LoginResponse = resp.json().await.map_err(|e| {
                    VoipTestError::Unknown(format!("Malformed /login response: {}", e))
                })?;
                tracing::info!(
                    "Logged in as {} (device {})",
                    login.user_id.as_deref().unwrap_or(user_id),
                    login.device_id.as_deref().unwrap_or("unknown")
                );
                self.access_token = Some(login.access_token.clone());
                Ok(login)
            }
            403 => {
                let err = MatrixError::from_response(resp).await;
                Err(VoipTestError::BadLoginCredentials(
                    err.error.unwrap_or_else(|| "403 on /login".into()),
                ))
            }
            400 => {
                let err = MatrixError::from_response(resp).await;
                Err(VoipTestError::LoginMethodUnsupported(
                    err.error.unwrap_or_else(|| "400 on /login".into()),
                ))
            }
            _ => {
                let err = MatrixError::from_response(resp).await;
                Err(VoipTestError::Unknown(err.describe(status)))
            }
        }
    }

    /// Adopt `token` after checking it against `/account/whoami`.
    /// Returns the user ID it belongs to.
    pub async fn login_with_access_token(&mut self, token: &str) -> Result<String, VoipTestError> {
        self.access_token = Some(token.to_string());
        self.whoami().await
    }

    pub async fn whoami(&self) -> Result<String, VoipTestError> {
        let resp = self
            .send(self.request(reqwest::Method::GET, "/account/whoami"))
            .await?;

        let status = resp.status();
        match status.as_u16() {
            200 => {
                let who: WhoAmI = resp.json().await.map_err(|e| {
                    VoipTestError::Unknown(format!("Malformed /account/whoami response: {}", e))
                })?;
                Ok(who.user_id)
            }
            401 | 403 => {
                let err = MatrixError::from_response(resp).await;
                Err(VoipTestError::BadAccessToken(err.describe(status)))
            }
            _ => {
                let err = MatrixError::from_response(resp).await;
                Err(VoipTestError::Unknown(err.describe(status)))
            }
        }
    }

    /// Fetch TURN URIs and credentials from `/voip/turnServer`.
    pub async fn get_turn_config(&self) -> Result<TurnConfig, VoipTestError> {
        let resp = self
            .send(self.request(reqwest::Method::GET, "/voip/turnServer"))
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let err = MatrixError::from_response(resp).await;
            return Err(VoipTestError::CannotGetTurnCredentials(err.describe(status)));
        }

        let body: TurnServerResponse = resp.json().await.map_err(|e| {
            VoipTestError::CannotGetTurnCredentials(format!(
                "Malformed /voip/turnServer response: {}",
                e
            ))
        })?;

        if body.uris.is_empty() {
            return Err(VoipTestError::NoTurnServers(
                "Empty `uris` list from /voip/turnServer".into(),
            ));
        }
        let username = body.username.ok_or_else(|| {
            VoipTestError::BadTurnCredentials("No `username` from /voip/turnServer".into())
        })?;
        let password = body.password.ok_or_else(|| {
            VoipTestError::BadTurnCredentials("No `password` from /voip/turnServer".into())
        })?;

        tracing::debug!("Homeserver offers {} TURN URIs", body.uris.len());
        Ok(TurnConfig {
            uris: body.uris,
            username,
            password,
            ttl: body.ttl,
        })
    }
}
