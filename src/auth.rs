use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::teams::TeamDirectory;
use crate::vault::Vault;

/// Request header carrying `hex(HMAC-SHA256(key, raw body))`.
pub const SIGNATURE_HEADER: &str = "x-deploy-signature";

type HmacSha256 = Hmac<Sha256>;

/// MAC over the exact request body bytes.
pub fn sign(body: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can use any key length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison of `signature` against the MAC of `body`.
pub fn verify_signature(body: &[u8], key: &[u8], signature: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can use any key length");
    mac.update(body);
    mac.verify_slice(signature).is_ok()
}

/// True when `timestamp` (unix seconds) lies within `max_skew` of `now`,
/// in either direction.
pub fn timestamp_within(timestamp: i64, now: DateTime<Utc>, max_skew: Duration) -> bool {
    let skew = now.timestamp().abs_diff(timestamp);
    skew <= max_skew.as_secs()
}

/// Identity established by a successful team-scoped verification. Request
/// handling after authentication may only act as this team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedTeam {
    pub team: String,
    pub external_group_id: String,
}

#[derive(Clone)]
pub struct Authenticator {
    vault: Vault,
    directory: Arc<dyn TeamDirectory>,
    provision_key: Arc<Vec<u8>>,
    max_skew: Duration,
}

impl Authenticator {
    pub fn new(
        vault: Vault,
        directory: Arc<dyn TeamDirectory>,
        provision_key: Vec<u8>,
        max_skew: Duration,
    ) -> Self {
        Self {
            vault,
            directory,
            provision_key: Arc::new(provision_key),
            max_skew,
        }
    }

    /// Checks a provisioning request against the shared provisioning key.
    pub fn verify_provisioning(&self, body: &[u8], signature: &[u8]) -> AppResult<()> {
        if verify_signature(body, &self.provision_key, signature) {
            Ok(())
        } else {
            warn!("provisioning request carried an invalid signature");
            Err(AppError::AuthenticationFailure)
        }
    }

    pub fn check_timestamp(&self, timestamp: i64) -> AppResult<()> {
        if timestamp_within(timestamp, Utc::now(), self.max_skew) {
            Ok(())
        } else {
            warn!(timestamp, "request timestamp outside the acceptance window");
            Err(AppError::AuthenticationFailure)
        }
    }

    /// Verifies a team-scoped request against every valid key of the team,
    /// most recent first. Missing team, missing keys, a stale timestamp and
    /// a bad MAC all collapse into `AuthenticationFailure`; store outages
    /// and corrupted key records propagate unchanged.
    pub async fn authenticate_team(
        &self,
        team: &str,
        body: &[u8],
        signature: &[u8],
        timestamp: i64,
    ) -> AppResult<AuthenticatedTeam> {
        self.check_timestamp(timestamp)?;

        let external_group_id = self
            .directory
            .external_group_id(team)
            .await
            .map_err(|err| match err {
                AppError::NotFound => {
                    warn!(%team, "request for unknown team");
                    AppError::AuthenticationFailure
                }
                other => other,
            })?;

        let keys = self
            .vault
            .lookup(team, &external_group_id)
            .await
            .map_err(|err| match err {
                AppError::NotFound => {
                    warn!(%team, "team has no valid api keys");
                    AppError::AuthenticationFailure
                }
                other => other,
            })?;

        let matched = keys
            .iter()
            .position(|record| verify_signature(body, record.key.as_bytes(), signature));

        match matched {
            Some(index) => {
                debug!(%team, key_index = index, "request signature verified");
                Ok(AuthenticatedTeam {
                    team: team.to_string(),
                    external_group_id,
                })
            }
            None => {
                warn!(%team, candidates = keys.len(), "request signature did not match any valid key");
                Err(AppError::AuthenticationFailure)
            }
        }
    }
}
