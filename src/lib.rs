//! # steam-authenticator
//!
//! Client-side core of a Steam mobile two-factor authenticator: enrolls a
//! new software authenticator against Steam's mobile endpoints and derives
//! the time-based 5-character alphanumeric login codes of Steam's TOTP
//! variant (HMAC-SHA1 truncation encoded base-26 over a 26-symbol alphabet,
//! deliberately not RFC 6238 compatible on the wire).
//!
//! ## Enrollment
//!
//! Enrollment is a re-entrant conversation: Steam may interrupt with a
//! CAPTCHA, an emailed login code, or an existing 2FA factor, and always
//! finishes by demanding an activation code it sends by email. Drive it by
//! calling [`SteamAuthenticator::enroll`] in a loop, answering each returned
//! [`EnrollStep`] through the [`EnrollState`]:
//!
//! ```no_run
//! # async fn demo() -> steam_authenticator::Result<()> {
//! use steam_authenticator::{EnrollState, EnrollStep, SteamAuthenticator};
//!
//! let mut authenticator = SteamAuthenticator::new()?;
//! let mut state = EnrollState::new("account", "hunter2")?;
//!
//! match authenticator.enroll(&mut state).await? {
//!     EnrollStep::AwaitingActivationCode => {
//!         state.activation_code = Some("ABC12".into()); // from the email
//!         assert!(authenticator.enroll(&mut state).await?.is_done());
//!         // Persist authenticator.secret_data() and show the user
//!         // authenticator.revocation_code().
//!     }
//!     step => eprintln!("more input needed: {step:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Codes
//!
//! Once enrolled (or restored via
//! [`SteamAuthenticator::from_secret_data`]), codes come from
//! [`SteamAuthenticator::calculate_code`]; the internal [`ServerClock`]
//! keeps the generator aligned with Steam's clock and backs off for five
//! minutes after a failed sync.

mod authenticator;
mod enroll;
mod error;
mod otp;
mod time;
mod transport;

pub mod crypto;

pub use authenticator::SteamAuthenticator;
pub use enroll::{EnrollState, EnrollStep};
pub use error::{Error, Result};
pub use otp::{STEAM_ALPHABET, code_for_interval, generate_code};
pub use time::ServerClock;
pub use transport::{Endpoints, MOBILE_USER_AGENT, MobileClient};
