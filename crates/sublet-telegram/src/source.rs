use std::{collections::VecDeque, path::Path};

use async_trait::async_trait;
use teloxide::{
    net::Download,
    prelude::*,
    types::{AllowedUpdate, UpdateKind},
};

use sublet_core::{
    collector::{ChatMessage, ChatSource, PhotoRef},
    errors::Error,
    Result,
};

use crate::{map_err, message_link};

/// Chat history as seen by the bot: every pending update for one chat,
/// served newest first.
///
/// The Bot API has no history call, so the bot must be a member of the chat
/// and only updates it has not confirmed yet are visible.
pub struct TelegramChatSource {
    bot: Bot,
    chat_id: i64,
    offset: i32,
    drained: bool,
    fetched: Vec<ChatMessage>,
    queue: VecDeque<ChatMessage>,
}

impl TelegramChatSource {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id,
            offset: 0,
            drained: false,
            fetched: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn from_token(token: impl Into<String>, chat_id: i64) -> Self {
        Self::new(Bot::new(token), chat_id)
    }

    /// Pull all pending updates. Safe to call again after a rate-limit error:
    /// the offset and what was fetched so far are kept.
    async fn drain(&mut self) -> Result<()> {
        loop {
            let updates = self
                .bot
                .get_updates()
                .offset(self.offset)
                .timeout(0)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::ChannelPost])
                .await
                .map_err(map_err)?;
            if updates.is_empty() {
                break;
            }
            for update in updates {
                self.offset = update.id + 1;
                match update.kind {
                    UpdateKind::Message(m) | UpdateKind::ChannelPost(m)
                        if m.chat.id.0 == self.chat_id =>
                    {
                        self.fetched.push(to_chat_message(&m));
                    }
                    _ => {}
                }
            }
        }

        let mut fetched = std::mem::take(&mut self.fetched);
        fetched.sort_by(|a, b| b.id.cmp(&a.id));
        tracing::info!("fetched {} messages from chat {}", fetched.len(), self.chat_id);
        self.queue = fetched.into();
        self.drained = true;
        Ok(())
    }
}

fn has_media(m: &Message) -> bool {
    m.photo().is_some()
        || m.video().is_some()
        || m.document().is_some()
        || m.animation().is_some()
        || m.audio().is_some()
        || m.voice().is_some()
        || m.video_note().is_some()
}

fn sender(m: &Message) -> Option<String> {
    if let Some(user) = m.from() {
        return user.username.clone();
    }
    m.sender_chat()
        .and_then(|c| c.username())
        .map(str::to_string)
}

fn to_chat_message(m: &Message) -> ChatMessage {
    let text = m.text().or_else(|| m.caption()).map(str::to_string);
    // Sizes come smallest first.
    let photo = m.photo().and_then(|sizes| sizes.last()).map(|best| PhotoRef {
        file_id: best.file.id.clone(),
    });
    ChatMessage {
        id: i64::from(m.id.0),
        text,
        date: m.date,
        sender: sender(m),
        has_media: has_media(m),
        photo,
        group_id: m.media_group_id().map(str::to_string),
        link: message_link(m.chat.id.0, m.chat.username(), m.id.0),
    }
}

#[async_trait]
impl ChatSource for TelegramChatSource {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>> {
        if !self.drained {
            self.drain().await?;
        }
        Ok(self.queue.pop_front())
    }

    async fn download_photo(&self, photo: &PhotoRef, dest: &Path) -> Result<()> {
        let file = self
            .bot
            .get_file(photo.file_id.clone())
            .await
            .map_err(map_err)?;
        let mut dst = tokio::fs::File::create(dest).await?;
        if let Err(e) = self.bot.download_file(&file.path, &mut dst).await {
            drop(dst);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(Error::External(format!("telegram download error: {e}")));
        }
        Ok(())
    }
}
