//! Enrollment of a new software authenticator against Steam's mobile
//! endpoints.
//!
//! The protocol is a multi-step conversation that Steam can interrupt at any
//! point to demand more input from the user (a CAPTCHA answer, an emailed
//! code, an existing 2FA code, the activation code from the enrollment
//! email). The driver is therefore re-entrant: the caller invokes
//! [`SteamAuthenticator::enroll`] repeatedly, filling in the requested
//! [`EnrollState`] inputs between calls, until it returns
//! [`EnrollStep::Done`] or a terminal [`EnrollStep::Failed`].
//!
//! Flow overview:
//! - `LOGIN`: establish session cookies, fetch the account's RSA key, send
//!   the PKCS#1-v1.5-wrapped password to `dologin`, and extract the OAuth
//!   token from the stringified JSON blob in the response.
//! - `ADD`: register a device identifier and request a new authenticator;
//!   Steam answers with the shared secret, serial, and revocation code, then
//!   emails the user an activation code.
//! - `FINALIZE`: submit the activation code together with a freshly derived
//!   login code, walking the clock offset across candidate windows until
//!   Steam accepts (it often rejects the first attempts while its own clock
//!   catches up, and may demand a second consecutive code via `want_more`).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::authenticator::SteamAuthenticator;
use crate::crypto;
use crate::error::{Error, Result};
use crate::time::local_now_ms;
use crate::transport::{COMMUNITY_BASE, MobileClient, json_i64, json_string};

const OAUTH_CLIENT_ID: &str = "DE45CD61";
const OAUTH_SCOPE: &str = "read_profile write_profile read_client write_client";
const LOGIN_FRIENDLY_NAME: &str = "#login_emailauth_friendlyname_mobile";
const CAPTCHA_PLACEHOLDER: &str = "enter above characters";

const FINALIZE_MAX_RETRIES: u32 = 30;
const FINALIZE_BASELINE_MS: i64 = 40_000;
const FINALIZE_STEP_MS: i64 = 30_000;
const STATUS_INVALID_ACTIVATION_CODE: i64 = 89;

const ACTIVATION_PROBLEM: &str = "There was a problem activating. There might be an issue with \
     the Steam servers. Please try again later.";

/// What the driver needs from the caller next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollStep {
    /// Solve the CAPTCHA at `url` and store the answer in
    /// [`EnrollState::captcha_text`].
    AwaitingCaptcha { id: String, url: String },
    /// Steam emailed a login code to the account's address; store it in
    /// [`EnrollState::email_auth_text`].
    AwaitingEmailCode { domain: Option<String> },
    /// The account already has another 2FA factor that must approve the
    /// login.
    AwaitingTwoFactor,
    /// Steam emailed the activation code; store it in
    /// [`EnrollState::activation_code`].
    AwaitingActivationCode,
    /// Enrollment finished; the authenticator now holds the shared secret.
    Done,
    /// The step failed in a way the caller can usually correct and retry.
    Failed { reason: String },
}

impl EnrollStep {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Mutable state of one enrollment conversation.
///
/// Created with the account credentials, then threaded through successive
/// [`SteamAuthenticator::enroll`] calls. Owns the session cookie jar for the
/// lifetime of the conversation; the password and OAuth token are zeroed on
/// drop.
pub struct EnrollState {
    pub username: String,
    pub password: SecretString,
    /// Caller's answer to [`EnrollStep::AwaitingCaptcha`].
    pub captcha_text: Option<String>,
    /// Caller's answer to [`EnrollStep::AwaitingEmailCode`].
    pub email_auth_text: Option<String>,
    /// Caller's answer to [`EnrollStep::AwaitingActivationCode`].
    pub activation_code: Option<String>,
    /// CAPTCHA id from the last challenge; echoed back on the next login.
    pub captcha_id: Option<String>,
    pub captcha_url: Option<String>,
    pub email_domain: Option<String>,
    pub steam_id: Option<String>,
    /// Revocation code the user must keep to deactivate out-of-band.
    pub revocation_code: Option<String>,
    /// Hex-encoded shared secret, published once enrollment succeeds.
    pub secret_hex: Option<SecretString>,
    /// Human-readable reason of the last recoverable failure.
    pub error: Option<String>,
    pub success: bool,
    pub(crate) oauth_token: Option<SecretString>,
    pub(crate) awaiting_activation: bool,
    pub(crate) client: MobileClient,
}

impl EnrollState {
    /// # Errors
    /// Returns `Error::Transport` if the HTTP client cannot be built.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Ok(Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            captcha_text: None,
            email_auth_text: None,
            activation_code: None,
            captcha_id: None,
            captcha_url: None,
            email_domain: None,
            steam_id: None,
            revocation_code: None,
            secret_hex: None,
            error: None,
            success: false,
            oauth_token: None,
            awaiting_activation: false,
            client: MobileClient::new()?,
        })
    }

    /// OAuth token obtained by the login step, if any.
    #[must_use]
    pub fn oauth_token(&self) -> Option<&SecretString> {
        self.oauth_token.as_ref()
    }

    /// Drop the session cookies and start a fresh conversation with Steam.
    pub(crate) fn reset_session(&mut self) -> Result<()> {
        self.client = MobileClient::new()?;
        Ok(())
    }
}

impl SteamAuthenticator {
    /// Drive the enrollment state machine as far as the available inputs
    /// allow, returning what is needed next.
    ///
    /// Recoverable protocol outcomes (challenges, a rejected activation
    /// code, an exhausted retry budget) are reported through the returned
    /// [`EnrollStep`] and mirrored into [`EnrollState::error`]; only
    /// transport and crypto failures are raised as errors, wrapped in
    /// [`Error::InvalidEnrollResponse`].
    ///
    /// # Errors
    /// Returns `Error::InvalidEnrollResponse` for transport, crypto, or
    /// malformed-response failures.
    pub async fn enroll(&mut self, state: &mut EnrollState) -> Result<EnrollStep> {
        state.error = None;
        let step = self
            .enroll_inner(state)
            .await
            .map_err(Error::into_enroll)?;
        match &step {
            EnrollStep::Failed { reason } => state.error = Some(reason.clone()),
            EnrollStep::Done => state.success = true,
            _ => {}
        }
        Ok(step)
    }

    async fn enroll_inner(&mut self, state: &mut EnrollState) -> Result<EnrollStep> {
        if state.oauth_token.is_none() {
            if let Some(interrupt) = self.login(state).await? {
                return Ok(interrupt);
            }
        }

        if !state.awaiting_activation {
            if let Some(interrupt) = self.add_authenticator(state).await? {
                return Ok(interrupt);
            }
            // The activation code arrives by email; nothing more to do until
            // the caller supplies it.
            return Ok(EnrollStep::AwaitingActivationCode);
        }

        if state.activation_code.is_none() {
            return Ok(EnrollStep::AwaitingActivationCode);
        }
        self.finalize(state).await
    }

    /// RSA-wrapped password login. `Ok(None)` means the OAuth token was
    /// obtained and the driver may continue.
    async fn login(&mut self, state: &mut EnrollState) -> Result<Option<EnrollStep>> {
        let community = self.endpoints.community.clone();

        // Prime the session cookies.
        state
            .client
            .get(&format!("{community}/login/home"), &[("goto", "0")])
            .await?;

        let body = state
            .client
            .post(
                &format!("{community}/login/getrsakey"),
                &[("username", state.username.as_str())],
            )
            .await?;
        let rsa_json: Value = serde_json::from_str(&body).map_err(|e| {
            Error::InvalidEnrollResponse(format!("getrsakey returned invalid JSON: {e}"))
        })?;
        if rsa_json.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(Error::InvalidEnrollResponse(format!(
                "Cannot get steam information for user: {}",
                state.username
            )));
        }
        if let Some(steam_id) = json_string(&rsa_json, "steamid") {
            state.steam_id = Some(steam_id);
        }
        let modulus = rsa_json
            .get("publickey_mod")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidEnrollResponse("getrsakey response is missing publickey_mod".into())
            })?;
        let exponent = rsa_json
            .get("publickey_exp")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidEnrollResponse("getrsakey response is missing publickey_exp".into())
            })?;
        let rsa_timestamp = json_string(&rsa_json, "timestamp").ok_or_else(|| {
            Error::InvalidEnrollResponse("getrsakey response is missing timestamp".into())
        })?;

        let ciphertext = crypto::rsa_encrypt_pkcs1(
            modulus,
            exponent,
            state.password.expose_secret().as_bytes(),
        )?;
        let encrypted_password = BASE64_STANDARD.encode(ciphertext);

        let captcha_gid = state.captcha_id.clone().unwrap_or_else(|| "-1".into());
        let captcha_text = state
            .captcha_text
            .clone()
            .unwrap_or_else(|| CAPTCHA_PLACEHOLDER.into());
        let email_auth = state.email_auth_text.clone().unwrap_or_default();
        let email_steam_id = if state.email_auth_text.is_some() {
            state.steam_id.clone().unwrap_or_default()
        } else {
            String::new()
        };
        let donotache = local_now_ms().to_string();

        let form = [
            ("password", encrypted_password.as_str()),
            ("username", state.username.as_str()),
            ("twofactorcode", ""),
            ("emailauth", email_auth.as_str()),
            ("loginfriendlyname", LOGIN_FRIENDLY_NAME),
            ("captchagid", captcha_gid.as_str()),
            ("captcha_text", captcha_text.as_str()),
            ("emailsteamid", email_steam_id.as_str()),
            ("rsatimestamp", rsa_timestamp.as_str()),
            ("remember_login", "false"),
            ("oauth_client_id", OAUTH_CLIENT_ID),
            ("oauth_scope", OAUTH_SCOPE),
            ("donotache", donotache.as_str()),
        ];
        let body = state
            .client
            .post(&format!("{community}/mobilelogin/dologin/"), &form)
            .await?;
        let login_json: Value = serde_json::from_str(&body).map_err(|e| {
            Error::InvalidEnrollResponse(format!("dologin returned invalid JSON: {e}"))
        })?;

        if login_json.get("captcha_needed").and_then(Value::as_bool) == Some(true) {
            let id = json_string(&login_json, "captcha_gid").unwrap_or_default();
            let url = format!("{COMMUNITY_BASE}/public/captcha.php?gid={id}");
            debug!(gid = %id, "login challenged with a captcha");
            state.captcha_id = Some(id.clone());
            state.captcha_url = Some(url.clone());
            return Ok(Some(EnrollStep::AwaitingCaptcha { id, url }));
        }
        state.captcha_id = None;
        state.captcha_url = None;

        if login_json.get("emailauth_needed").and_then(Value::as_bool) == Some(true) {
            let domain = json_string(&login_json, "emaildomain").filter(|d| !d.is_empty());
            debug!("login challenged with an email code");
            state.email_domain = domain.clone();
            return Ok(Some(EnrollStep::AwaitingEmailCode { domain }));
        }
        state.email_domain = None;

        if login_json.get("requires_twofactor").and_then(Value::as_bool) == Some(true) {
            debug!("login challenged with an existing 2FA factor");
            return Ok(Some(EnrollStep::AwaitingTwoFactor));
        }

        let login_complete =
            login_json.get("login_complete").and_then(Value::as_bool) == Some(true);
        let oauth_raw = login_json.get("oauth").and_then(Value::as_str);
        let Some(oauth_raw) = oauth_raw.filter(|_| login_complete) else {
            let reason = json_string(&login_json, "message")
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "No OAuth token in response".to_string());
            return Ok(Some(EnrollStep::Failed { reason }));
        };

        // The oauth field is JSON serialized *inside* the JSON response;
        // parse it as a second stage.
        let oauth: Value = serde_json::from_str(oauth_raw).map_err(|e| {
            Error::InvalidEnrollResponse(format!("oauth blob is not valid JSON: {e}"))
        })?;
        let token = oauth
            .get("oauth_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidEnrollResponse("oauth blob is missing oauth_token".into())
            })?;
        state.oauth_token = Some(SecretString::from(token.to_string()));
        if let Some(steam_id) = json_string(&oauth, "steamid") {
            state.steam_id = Some(steam_id);
        }
        debug!("login complete, oauth token obtained");
        Ok(None)
    }

    /// Request a new authenticator. `Ok(None)` means Steam issued the secret
    /// and sent the activation email.
    async fn add_authenticator(&mut self, state: &mut EnrollState) -> Result<Option<EnrollStep>> {
        let api = self.endpoints.api.clone();
        let access_token = state
            .oauth_token
            .as_ref()
            .ok_or_else(|| Error::InvalidEnrollResponse("no oauth token for enrollment".into()))?
            .expose_secret()
            .to_string();
        let steam_id = state.steam_id.clone().ok_or_else(|| {
            Error::InvalidEnrollResponse("no steam id recorded for enrollment".into())
        })?;

        // Presence handshake; Steam ignores failures here and so do we.
        if let Err(err) = state
            .client
            .post(
                &format!("{api}/ISteamWebUserPresenceOAuth/Logon/v0001"),
                &[("access_token", access_token.as_str())],
            )
            .await
        {
            debug!("presence logon failed (ignored): {err}");
        }

        if self.device_id.is_none() {
            self.device_id = Some(crypto::build_device_id()?);
        }
        let device_id = self.device_id.clone().unwrap_or_default();

        let body = state
            .client
            .post(
                &format!("{api}/ITwoFactorService/AddAuthenticator/v0001"),
                &[
                    ("access_token", access_token.as_str()),
                    ("steamid", steam_id.as_str()),
                    ("authenticator_type", "1"),
                    ("device_identifier", device_id.as_str()),
                ],
            )
            .await?;

        let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let response = json.get("response").cloned().unwrap_or(Value::Null);
        let Some(revocation_code) = response
            .get("revocation_code")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            // The token is no longer usable; force a fresh login on the next
            // call.
            state.oauth_token = None;
            state.reset_session()?;
            return Ok(Some(EnrollStep::Failed {
                reason: format!("Invalid response from Steam: {body}"),
            }));
        };

        let shared_secret = response
            .get("shared_secret")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::InvalidEnrollResponse(
                    "AddAuthenticator response is missing shared_secret".into(),
                )
            })?;
        let secret = BASE64_STANDARD.decode(shared_secret).map_err(|e| {
            Error::InvalidEnrollResponse(format!("shared_secret is not valid base64: {e}"))
        })?;

        self.secret_key = Some(SecretSlice::from(secret));
        self.serial = json_string(&response, "serial_number");
        self.revocation_code = Some(revocation_code.clone());
        state.revocation_code = Some(revocation_code);
        if let Some(server_time_s) = json_i64(&response, "server_time") {
            self.clock.adjust(server_time_s * 1000);
        }
        debug!("authenticator issued, requesting activation email");

        state
            .client
            .post(
                &format!("{api}/ITwoFactorService/SendEmail/v0001"),
                &[
                    ("access_token", access_token.as_str()),
                    ("steamid", steam_id.as_str()),
                    ("email_type", "1"),
                    ("include_activation", "1"),
                ],
            )
            .await?;

        state.awaiting_activation = true;
        Ok(None)
    }

    /// Submit the activation code, walking the clock offset across candidate
    /// windows until Steam accepts.
    async fn finalize(&mut self, state: &mut EnrollState) -> Result<EnrollStep> {
        let api = self.endpoints.api.clone();
        let access_token = state
            .oauth_token
            .as_ref()
            .ok_or_else(|| Error::InvalidEnrollResponse("no oauth token for activation".into()))?
            .expose_secret()
            .to_string();
        let steam_id = state.steam_id.clone().ok_or_else(|| {
            Error::InvalidEnrollResponse("no steam id recorded for activation".into())
        })?;
        let activation_code = state.activation_code.clone().ok_or_else(|| {
            Error::InvalidEnrollResponse("no activation code supplied".into())
        })?;

        // Start one interval behind; Steam's clock is usually ahead of the
        // secret it just issued.
        self.clock.apply_drift(-FINALIZE_BASELINE_MS);

        let mut retries = 0;
        while state.awaiting_activation && retries < FINALIZE_MAX_RETRIES {
            let code = self.current_code()?;
            let authenticator_time = (self.clock.server_time_ms() / 1000).to_string();
            let form = [
                ("access_token", access_token.as_str()),
                ("steamid", steam_id.as_str()),
                ("activation_code", activation_code.as_str()),
                ("authenticator_code", code.as_str()),
                ("authenticator_time", authenticator_time.as_str()),
            ];
            let body = state
                .client
                .post(
                    &format!("{api}/ITwoFactorService/FinalizeAddAuthenticator/v0001"),
                    &form,
                )
                .await?;
            let json: Value = serde_json::from_str(&body).map_err(|e| {
                Error::InvalidEnrollResponse(format!(
                    "FinalizeAddAuthenticator returned invalid JSON: {e}"
                ))
            })?;
            let response = json.get("response").cloned().unwrap_or(Value::Null);

            if json_i64(&response, "status") == Some(STATUS_INVALID_ACTIVATION_CODE) {
                return Ok(EnrollStep::Failed {
                    reason: "Invalid activation code".into(),
                });
            }
            if let Some(server_time_s) = json_i64(&response, "server_time") {
                self.clock.adjust(server_time_s * 1000);
            }
            if response.get("success").and_then(Value::as_bool) == Some(true) {
                if response.get("want_more").and_then(Value::as_bool) == Some(true) {
                    debug!(retries, "server wants another consecutive code");
                    self.clock.apply_drift(FINALIZE_STEP_MS);
                    retries += 1;
                    continue;
                }
                state.awaiting_activation = false;
                break;
            }

            debug!(retries, "activation attempt rejected, stepping clock");
            self.clock.apply_drift(FINALIZE_STEP_MS);
            retries += 1;
        }

        if state.awaiting_activation {
            return Ok(EnrollStep::Failed {
                reason: ACTIVATION_PROBLEM.into(),
            });
        }

        state.secret_hex = self.secret_hex().map(SecretString::from);

        // Confirmation email; enrollment already succeeded, so a failure
        // here is not worth surfacing.
        if let Err(err) = state
            .client
            .post(
                &format!("{api}/ITwoFactorService/SendEmail/v0001"),
                &[
                    ("access_token", access_token.as_str()),
                    ("steamid", steam_id.as_str()),
                    ("email_type", "2"),
                ],
            )
            .await
        {
            debug!("confirmation email failed (ignored): {err}");
        }

        debug!("enrollment finalized");
        Ok(EnrollStep::Done)
    }
}
