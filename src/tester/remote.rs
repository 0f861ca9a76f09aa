//! Client for the remote testing service that answers doctored offers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sdp::SessionDescription;
use crate::error::VoipTestError;

#[derive(Serialize)]
struct TestRequest<'a> {
    offer: &'a SessionDescription,
    /// Raw SDP candidate line (`candidate:...`).
    candidate: &'a str,
}

#[derive(Deserialize)]
struct TestResponse {
    answer: SessionDescription,
}

/// `POST {offer, candidate}` → `{answer}`.
pub struct RemoteTestService {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RemoteTestService {
    pub fn new(http: reqwest::Client, url: &str, timeout: Duration) -> Self {
        Self {
            http,
            url: url.to_string(),
            timeout,
        }
    }

    /// Send a doctored offer and the candidate it keeps; return the answer.
    pub async fn exchange(
        &self,
        offer: &SessionDescription,
        candidate: &str,
    ) -> Result<SessionDescription, VoipTestError> {
        tracing::debug!("Testing service POST {}", self.url);

        let resp = self
            .http
            .post(&self.url)
            .json(&TestRequest { offer, candidate })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                VoipTestError::RemoteServiceRequestFailed(format!(
                    "POST {} failed: {}",
                    self.url, e
                ))
            })?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(VoipTestError::RemoteServiceRequestFailed(format!(
                "{} when contacting testing service: {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: TestResponse = resp.json().await.map_err(|e| {
            VoipTestError::RemoteServiceRequestFailed(format!(
                "Malformed testing service response: {}",
                e
            ))
        })?;

        Ok(parsed.answer)
    }
}
