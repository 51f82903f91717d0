//! Server-clock synchronization.
//!
//! Codes are derived from Steam's clock, not the local one. The clock keeps a
//! signed millisecond offset (`server - local`) that is only updated from an
//! authoritative server response, and backs off for five minutes after a
//! failed sync so a flapping network cannot hammer the QueryTime endpoint.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{MobileClient, json_i64};

const SYNC_COOLDOWN: Duration = Duration::from_secs(5 * 60);

pub(crate) fn local_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Per-authenticator view of Steam's clock.
#[derive(Debug, Default)]
pub struct ServerClock {
    diff_ms: i64,
    last_synced: Option<Instant>,
    last_error: Option<Instant>,
}

impl ServerClock {
    /// Current server time in Unix milliseconds.
    #[must_use]
    pub fn server_time_ms(&self) -> i64 {
        local_now_ms() + self.diff_ms
    }

    /// Signed offset in milliseconds: server minus local.
    #[must_use]
    pub fn server_time_diff_ms(&self) -> i64 {
        self.diff_ms
    }

    /// Local instant at which the offset was last established from an
    /// authoritative server response.
    #[must_use]
    pub fn last_synced(&self) -> Option<Instant> {
        self.last_synced
    }

    /// Adopt an authoritative server timestamp (Unix milliseconds).
    pub fn adjust(&mut self, server_time_ms: i64) {
        self.diff_ms = server_time_ms - local_now_ms();
        self.last_synced = Some(Instant::now());
        self.last_error = None;
    }

    /// Nudge the offset without a server response; used by the activation
    /// loop to walk across candidate windows.
    pub(crate) fn apply_drift(&mut self, delta_ms: i64) {
        self.diff_ms += delta_ms;
    }

    /// Query Steam for its clock and update the offset.
    ///
    /// A failed sync zeroes the offset and arms a five-minute cooldown;
    /// further calls inside the cooldown are silent no-ops.
    ///
    /// # Errors
    /// Returns `Error::Transport` on HTTP failure and
    /// `Error::InvalidEnrollResponse` when the response carries no
    /// `server_time`.
    pub async fn sync(&mut self, client: &MobileClient, api_base: &str) -> Result<()> {
        if self
            .last_error
            .is_some_and(|at| at.elapsed() < SYNC_COOLDOWN)
        {
            debug!("time sync skipped: inside failure cooldown");
            return Ok(());
        }

        let url = format!("{api_base}/ITwoFactorService/QueryTime/v0001");
        let body = match client.post(&url, &[]).await {
            Ok(body) => body,
            Err(err) => {
                self.fail();
                return Err(err);
            }
        };

        let Some(server_time_s) = serde_json::from_str::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(|json| json.get("response"))
            .and_then(|response| json_i64(response, "server_time"))
        else {
            self.fail();
            return Err(Error::InvalidEnrollResponse(
                "QueryTime response carries no server_time".into(),
            ));
        };

        self.adjust(server_time_s * 1000);
        debug!(diff_ms = self.diff_ms, "server clock synchronized");
        Ok(())
    }

    fn fail(&mut self) {
        self.diff_ms = 0;
        self.last_error = Some(Instant::now());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    const QUERY_TIME: &str = "/ITwoFactorService/QueryTime/v0001";

    #[tokio::test]
    async fn sync_adopts_string_server_time() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let future_s = local_now_ms() / 1000 + 100_000;
        Mock::given(method("POST"))
            .and(path(QUERY_TIME))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"server_time": future_s.to_string()}
            })))
            .mount(&server)
            .await;

        let client = MobileClient::new().unwrap();
        let mut clock = ServerClock::default();
        clock.sync(&client, &server.uri()).await.unwrap();

        let diff = clock.server_time_diff_ms();
        assert!((99_990_000..=100_010_000).contains(&diff), "diff was {diff}");
        assert!((clock.server_time_ms() - local_now_ms() - diff).abs() < 1_000);
    }

    #[tokio::test]
    async fn sync_adopts_numeric_server_time() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let future_s = local_now_ms() / 1000 + 50;
        Mock::given(method("POST"))
            .and(path(QUERY_TIME))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"server_time": future_s}
            })))
            .mount(&server)
            .await;

        let client = MobileClient::new().unwrap();
        let mut clock = ServerClock::default();
        clock.sync(&client, &server.uri()).await.unwrap();
        assert!(clock.server_time_diff_ms() > 40_000);
    }

    #[tokio::test]
    async fn failed_sync_zeroes_offset_and_arms_cooldown() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(QUERY_TIME))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = MobileClient::new().unwrap();
        let mut clock = ServerClock::default();
        clock.adjust(local_now_ms() + 77_000);
        assert!(clock.server_time_diff_ms() > 70_000);

        assert!(clock.sync(&client, &server.uri()).await.is_err());
        assert_eq!(clock.server_time_diff_ms(), 0);

        // Second call is a silent no-op inside the cooldown: still exactly
        // one request on the wire.
        clock.sync(&client, &server.uri()).await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unparseable_body_arms_cooldown() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(QUERY_TIME))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let client = MobileClient::new().unwrap();
        let mut clock = ServerClock::default();
        let err = clock.sync(&client, &server.uri()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidEnrollResponse(_)));

        clock.sync(&client, &server.uri()).await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
