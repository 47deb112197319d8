//! Telegram adapter (teloxide).
//!
//! Implements the `sublet-core` [`ChatSource`](sublet_core::collector::ChatSource)
//! over the Bot API and hosts the verification-code bot.

use sublet_core::errors::Error;

pub mod bot;
pub mod source;

pub use bot::{BotService, BotState};
pub use source::TelegramChatSource;

/// Map a Bot API error; `RetryAfter` becomes the core rate-limit signal.
pub(crate) fn map_err(e: teloxide::RequestError) -> Error {
    match e {
        teloxide::RequestError::RetryAfter(d) => Error::RateLimited { retry_after: d },
        teloxide::RequestError::Api(teloxide::ApiError::TerminatedByOtherGetUpdates) => {
            Error::External(
                "telegram error: another process is polling updates with this token".to_string(),
            )
        }
        other => Error::External(format!("telegram error: {other}")),
    }
}

/// Public link to a chat message.
///
/// Chats with a username get `t.me/<username>/<id>`; private supergroups and
/// channels get `t.me/c/<internal id>/<id>`, the internal id being the chat id
/// without its `-100` prefix.
pub fn message_link(chat_id: i64, username: Option<&str>, message_id: i32) -> String {
    if let Some(u) = username.filter(|u| !u.is_empty()) {
        return format!("https://t.me/{u}/{message_id}");
    }
    let raw = chat_id.to_string();
    let internal = raw
        .strip_prefix("-100")
        .or_else(|| raw.strip_prefix('-'))
        .unwrap_or(&raw);
    format!("https://t.me/c/{internal}/{message_id}")
}

/// Split `/cmd@botname args` into a lowercase command and the rest.
pub(crate) fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}
