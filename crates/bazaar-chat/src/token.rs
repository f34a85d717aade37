use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use tracing::{debug, info};

/// Exchange tokens live for one minute; a client is expected to open the
/// WebSocket immediately after requesting one.
const TOKEN_TTL_MS: i64 = 60 * 1000;

/// Sweep interval. The sweep only bounds memory; `consume` already rejects
/// expired entries on its own.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct LoginToken {
    user_id: i64,
    expires_at: i64,
}

/// Issues and redeems the single-use, time-limited tokens that upgrade an
/// HTTP-authenticated client to an authenticated WebSocket session.
///
/// The map is process memory only and lost on restart, by design. One mutex
/// serializes issue/consume/sweep; every operation is O(1)-ish on a map that
/// holds at most a minute of traffic.
pub struct TokenBroker {
    tokens: Mutex<HashMap<String, LoginToken>>,
}

impl TokenBroker {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a token for the user: 32 random bytes, hex-encoded.
    pub fn issue(&self, user_id: i64) -> String {
        self.issue_at(user_id, Utc::now().timestamp_millis())
    }

    /// Redeem a token, removing it atomically with the lookup. Returns the
    /// user id only for a live token; expired and unknown are
    /// indistinguishable to the caller.
    pub fn consume(&self, token: &str) -> Option<i64> {
        self.consume_at(token, Utc::now().timestamp_millis())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now().timestamp_millis())
    }

    fn issue_at(&self, user_id: i64, now_ms: i64) -> String {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);

        self.lock().insert(
            token.clone(),
            LoginToken {
                user_id,
                expires_at: now_ms + TOKEN_TTL_MS,
            },
        );

        token
    }

    fn consume_at(&self, token: &str, now_ms: i64) -> Option<i64> {
        let entry = self.lock().remove(token)?;
        (now_ms <= entry.expires_at).then_some(entry.user_id)
    }

    fn sweep_at(&self, now_ms: i64) -> usize {
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now_ms);
        before - tokens.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LoginToken>> {
        // A poisoned lock means a holder panicked mid-operation; the map is
        // still coherent, so recover rather than fail every redemption.
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TokenBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that prunes expired tokens every five minutes.
/// Spawned once by the server; runs for the life of the process.
pub async fn run_sweep_loop(broker: Arc<TokenBroker>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        interval.tick().await;
        let removed = broker.sweep();
        if removed > 0 {
            info!("Token sweep: dropped {} expired tokens", removed);
        } else {
            debug!("Token sweep: nothing to drop");
        }
    }
}
