//! Verification-code bot with an explicit start/stop lifecycle.

use std::sync::Arc;

use teloxide::{
    dispatching::{Dispatcher, ShutdownToken},
    dptree,
    prelude::*,
};
use tokio::task::JoinHandle;

use sublet_core::{errors::Error, verification::VerificationCodes, Result};

use crate::parse_command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotState {
    Init,
    Running,
    Stopped,
}

/// Owned handle to the polling bot.
pub struct BotService {
    bot: Bot,
    codes: Arc<VerificationCodes>,
    state: BotState,
    shutdown: Option<ShutdownToken>,
    task: Option<JoinHandle<()>>,
}

impl BotService {
    pub fn new(token: impl Into<String>, codes: Arc<VerificationCodes>) -> Self {
        Self {
            bot: Bot::new(token),
            codes,
            state: BotState::Init,
            shutdown: None,
            task: None,
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    /// Spawn the dispatcher on the current runtime.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == BotState::Running {
            return Err(Error::External("bot service is already running".to_string()));
        }

        match self.bot.get_me().await {
            Ok(me) => tracing::info!("bot started: @{}", me.username()),
            Err(e) => return Err(crate::map_err(e)),
        }

        let handler = Update::filter_message().endpoint(handle_message);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.codes.clone()])
            .default_handler(|_| async {})
            .build();
        self.shutdown = Some(dispatcher.shutdown_token());
        self.task = Some(tokio::spawn(async move {
            dispatcher.dispatch().await;
        }));
        self.state = BotState::Running;
        Ok(())
    }

    /// Graceful shutdown. A service that is not running is left as is.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != BotState::Running {
            return Ok(());
        }

        let task = self.task.take();
        let mut stopped = false;
        if let Some(token) = self.shutdown.take() {
            if let Ok(done) = token.shutdown() {
                done.await;
                stopped = true;
            }
        }
        if !stopped {
            // Dispatcher has not begun polling yet.
            if let Some(t) = task.as_ref() {
                t.abort();
            }
        }
        if let Some(t) = task {
            if let Err(e) = t.await {
                if !e.is_cancelled() {
                    return Err(Error::External(format!("bot task failed: {e}")));
                }
            }
        }

        self.state = BotState::Stopped;
        tracing::info!("bot stopped");
        Ok(())
    }
}

fn start_reply(code: &str, ttl_minutes: u64) -> String {
    format!(
        "Ваш код подтверждения: {code}\n\
         Код действителен в течение {ttl_minutes} минут.\n\n\
         Введите полученный код на странице авторизации."
    )
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    codes: Arc<VerificationCodes>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    let (cmd, args) = parse_command(text);
    match cmd.as_str() {
        "start" => {
            let code = codes.issue(chat_id).await;
            let minutes = (codes.ttl().as_secs() / 60).max(1);
            bot.send_message(msg.chat.id, start_reply(&code, minutes))
                .await?;
            tracing::info!("verification code sent to chat_id {chat_id}");
        }
        "verify" => {
            let reply = if codes.verify(chat_id, &args).await {
                "✅ Код подтверждён."
            } else {
                "❌ Неверный или просроченный код."
            };
            bot.send_message(msg.chat.id, reply).await?;
        }
        _ => {}
    }
    Ok(())
}
