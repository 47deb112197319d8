//! One-time verification codes handed out by the bot.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use rand::Rng;
use tokio::sync::Mutex;

pub const CODE_LEN: usize = 6;

/// Codes per chat id, each valid once and only until its TTL passes.
pub struct VerificationCodes {
    ttl: Duration,
    codes: Mutex<HashMap<i64, (String, Instant)>>,
}

impl VerificationCodes {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            codes: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh code for `chat_id`, replacing any earlier one.
    pub async fn issue(&self, chat_id: i64) -> String {
        let code = generate_code();
        let mut codes = self.codes.lock().await;
        let now = Instant::now();
        codes.retain(|_, (_, issued)| now.duration_since(*issued) < self.ttl);
        codes.insert(chat_id, (code.clone(), now));
        code
    }

    /// Check and consume a code. Expired or wrong codes fail; a wrong code
    /// leaves the stored one in place.
    pub async fn verify(&self, chat_id: i64, code: &str) -> bool {
        let mut codes = self.codes.lock().await;
        let Some((expected, issued)) = codes.get(&chat_id) else {
            return false;
        };
        if issued.elapsed() >= self.ttl {
            codes.remove(&chat_id);
            return false;
        }
        if expected != code.trim() {
            return false;
        }
        codes.remove(&chat_id);
        true
    }
}

fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:0width$}", width = CODE_LEN)
}
