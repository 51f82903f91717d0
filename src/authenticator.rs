//! The enrolled authenticator: shared secret, identity fields, and the
//! ongoing code/sync surface.

use secrecy::{ExposeSecret, SecretSlice};
use tracing::warn;

use crate::error::{Error, Result};
use crate::otp;
use crate::time::ServerClock;
use crate::transport::{Endpoints, MobileClient};

/// A Steam mobile authenticator.
///
/// Starts empty; [`enroll`](SteamAuthenticator::enroll) populates the shared
/// secret, serial, device identifier, and revocation code. Once enrolled it
/// only needs [`calculate_code`](SteamAuthenticator::calculate_code) and the
/// occasional [`sync`](SteamAuthenticator::sync).
///
/// The shared secret is held in a zero-on-drop container and never logged.
pub struct SteamAuthenticator {
    pub(crate) secret_key: Option<SecretSlice<u8>>,
    pub(crate) serial: Option<String>,
    pub(crate) device_id: Option<String>,
    pub(crate) revocation_code: Option<String>,
    pub(crate) clock: ServerClock,
    pub(crate) endpoints: Endpoints,
    client: MobileClient,
}

impl SteamAuthenticator {
    /// Fresh, un-enrolled authenticator against the production endpoints.
    ///
    /// # Errors
    /// Returns `Error::Transport` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_endpoints(Endpoints::default())
    }

    /// # Errors
    /// Returns `Error::Transport` if the HTTP client cannot be built.
    pub fn with_endpoints(endpoints: Endpoints) -> Result<Self> {
        Ok(Self {
            secret_key: None,
            serial: None,
            device_id: None,
            revocation_code: None,
            clock: ServerClock::default(),
            endpoints,
            client: MobileClient::new()?,
        })
    }

    /// Restore an authenticator from [`secret_data`](Self::secret_data)
    /// output, against the production endpoints.
    ///
    /// # Errors
    /// Returns `Error::EncryptedSecretData` if the payload is not the
    /// plaintext serialization (i.e. the caller has not decrypted it yet)
    /// and `Error::Transport` if the HTTP client cannot be built.
    pub fn from_secret_data(data: &str) -> Result<Self> {
        let mut authenticator = Self::new()?;
        authenticator.load_secret_data(data)?;
        Ok(authenticator)
    }

    #[must_use]
    pub fn is_enrolled(&self) -> bool {
        self.secret_key.is_some()
    }

    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// The code the user needs to deactivate this authenticator out-of-band.
    #[must_use]
    pub fn revocation_code(&self) -> Option<&str> {
        self.revocation_code.as_deref()
    }

    #[must_use]
    pub fn server_time_ms(&self) -> i64 {
        self.clock.server_time_ms()
    }

    #[must_use]
    pub fn server_time_diff_ms(&self) -> i64 {
        self.clock.server_time_diff_ms()
    }

    /// Current 5-character login code. With `resync` the clock is refreshed
    /// from Steam first; a failed refresh falls back to the current offset.
    ///
    /// # Errors
    /// Returns `Error::NotEnrolled` when no shared secret is present.
    pub async fn calculate_code(&mut self, resync: bool) -> Result<String> {
        if self.secret_key.is_none() {
            return Err(Error::NotEnrolled);
        }
        if resync {
            if let Err(err) = self.sync().await {
                warn!("time sync failed, using current offset: {err}");
            }
        }
        self.current_code()
    }

    /// Force a server-time sync, subject to the failure cooldown.
    ///
    /// # Errors
    /// Returns `Error::Transport` or `Error::InvalidEnrollResponse` when the
    /// QueryTime call fails outside the cooldown.
    pub async fn sync(&mut self) -> Result<()> {
        self.clock.sync(&self.client, &self.endpoints.api).await
    }

    pub(crate) fn current_code(&self) -> Result<String> {
        let secret = self.secret_key.as_ref().ok_or(Error::NotEnrolled)?;
        otp::generate_code(secret.expose_secret(), self.clock.server_time_ms())
    }

    pub(crate) fn secret_hex(&self) -> Option<String> {
        self.secret_key
            .as_ref()
            .map(|secret| hex::encode(secret.expose_secret()))
    }

    /// Serialize the persistent fields as
    /// `hex(secret)|hex(serial)|hex(device_id)|hex(revocation_code)`.
    /// `None` before enrollment.
    #[must_use]
    pub fn secret_data(&self) -> Option<String> {
        let secret = self.secret_hex()?;
        Some(format!(
            "{}|{}|{}|{}",
            secret,
            hex::encode(self.serial.as_deref().unwrap_or_default()),
            hex::encode(self.device_id.as_deref().unwrap_or_default()),
            hex::encode(self.revocation_code.as_deref().unwrap_or_default()),
        ))
    }

    /// Load persistent fields from a [`secret_data`](Self::secret_data)
    /// payload. Missing trailing fields are left empty; an empty payload
    /// clears everything.
    ///
    /// # Errors
    /// Returns `Error::EncryptedSecretData` if any field is not valid hex,
    /// because the payload is then assumed to still be encrypted by the
    /// caller's storage layer.
    pub fn load_secret_data(&mut self, data: &str) -> Result<()> {
        if data.is_empty() {
            self.secret_key = None;
            self.serial = None;
            self.device_id = None;
            self.revocation_code = None;
            return Ok(());
        }

        let mut parts = data.split('|');
        let secret_hex = parts.next().unwrap_or_default();
        let secret = hex::decode(secret_hex).map_err(|_| Error::EncryptedSecretData)?;
        self.secret_key = Some(SecretSlice::from(secret));
        self.serial = Self::hex_field(parts.next())?;
        self.device_id = Self::hex_field(parts.next())?;
        self.revocation_code = Self::hex_field(parts.next())?;
        Ok(())
    }

    fn hex_field(part: Option<&str>) -> Result<Option<String>> {
        let Some(part) = part.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let bytes = hex::decode(part).map_err(|_| Error::EncryptedSecretData)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::EncryptedSecretData)
    }
}

impl std::fmt::Debug for SteamAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteamAuthenticator")
            .field("enrolled", &self.is_enrolled())
            .field("serial", &self.serial)
            .field("device_id", &self.device_id)
            .field("server_time_diff_ms", &self.clock.server_time_diff_ms())
            .finish_non_exhaustive()
    }
}
