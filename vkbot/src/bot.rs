//! Scheduler: the ingestion loop and the relationship reconciliation loop.
//!
//! One ingestion cycle is poll → parse → normalize → dedup → dispatch → send replies → mark
//! action-routed messages read. Reconciliation periodically accepts incoming relationship
//! requests (when enabled), withdraws outgoing ones, and fires the matching action handlers.
//! Errors surfaced by either loop are also sent to the administrator as a direct message when an
//! admin id is configured.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use vkbot_core::{
    AccountMode, BotError, Message, RelationshipDirection, RemoteApi, Reply, ReplyTarget, Result,
    ACTION_FRIEND_ADD, ACTION_FRIEND_DELETE,
};
use vkbot_longpoll::{
    normalize_batch, parse_updates, DedupCache, LongPollSession, SessionSettings, WireFormat,
    DEFAULT_DEDUP_WINDOW,
};
use vkbot_router::{ErrorSink, Handler, Router};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DELIVERY_FAILURE_TEXT: &str = "Cant send message, maybe wrong/china letters?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSettings {
    pub poll_interval: Duration,
    pub reconcile_interval: Duration,
    pub dedup_window: Duration,
    pub auto_accept_relationships: bool,
    /// Sent once in place of a reply the remote refused. Empty disables the fallback.
    pub delivery_failure_text: String,
    /// User id that receives error notifications.
    pub admin_id: Option<i64>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            auto_accept_relationships: false,
            delivery_failure_text: DEFAULT_DELIVERY_FAILURE_TEXT.to_string(),
            admin_id: None,
        }
    }
}

/// Counters for one ingestion cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Messages that survived normalization and dedup.
    pub admitted: usize,
    pub replies_sent: usize,
    pub marked_read: usize,
}

/// Sends notices to the administrator as direct messages. Inert without an admin id.
#[derive(Clone)]
pub struct AdminNotifier {
    api: Arc<dyn RemoteApi>,
    admin_id: Option<i64>,
}

impl AdminNotifier {
    pub fn new(api: Arc<dyn RemoteApi>, admin_id: Option<i64>) -> Self {
        Self {
            api,
            admin_id: admin_id.filter(|id| *id != 0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.admin_id.is_some()
    }

    /// Returns whether the notice was delivered. A failed delivery is only logged.
    pub async fn notify(&self, text: &str) -> bool {
        let Some(admin_id) = self.admin_id else {
            return false;
        };
        match self
            .api
            .send_reply(&ReplyTarget::User(admin_id), &Reply::text(text))
            .await
        {
            Ok(_) => {
                debug!(admin_id, "step: admin notified");
                true
            }
            Err(e) => {
                warn!(admin_id, error = %e, "Admin notification failed");
                false
            }
        }
    }

    async fn notify_error(&self, message: Option<&Message>, error: &BotError) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.notify(&error_notice(message, error)).await
    }
}

fn error_notice(message: Option<&Message>, error: &BotError) -> String {
    match message {
        Some(m) => {
            let at = m
                .sent_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown time".to_string());
            format!(
                "vkbot error on message {} from {} at {}: {}",
                m.id, m.sender_id, at, error
            )
        }
        None => format!("vkbot error: {}", error),
    }
}

/// Collects handlers and settings, then freezes them into a [`VkBot`].
pub struct BotBuilder {
    api: Arc<dyn RemoteApi>,
    session_settings: SessionSettings,
    settings: BotSettings,
    router: Router,
    error_sink: ErrorSink,
}

impl BotBuilder {
    pub fn new(api: Arc<dyn RemoteApi>, account_mode: AccountMode) -> Self {
        Self {
            api,
            session_settings: SessionSettings::new(account_mode),
            settings: BotSettings::default(),
            router: Router::new(),
            error_sink: ErrorSink::new(),
        }
    }

    /// Replaces the session settings; the account mode comes with them.
    pub fn session_settings(mut self, settings: SessionSettings) -> Self {
        self.session_settings = settings;
        self
    }

    pub fn settings(mut self, settings: BotSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn handle_message<H: Handler + 'static>(mut self, prefix: &str, handler: H) -> Self {
        self.router = self.router.add_message_handler(prefix, Arc::new(handler));
        self
    }

    pub fn handle_action<H: Handler + 'static>(mut self, name: &str, handler: H) -> Self {
        self.router = self.router.add_action_handler(name, Arc::new(handler));
        self
    }

    /// Sets the single error callback. Without one, the first reported error stops the bot.
    pub fn handle_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<&Message>, &BotError) + Send + Sync + 'static,
    {
        self.error_sink = ErrorSink::with_callback(callback);
        self
    }

    pub fn auto_accept_relationships(mut self, enabled: bool) -> Self {
        self.settings.auto_accept_relationships = enabled;
        self
    }

    /// Sends every error the loops surface to `admin_id` as a direct message.
    pub fn notify_admin(mut self, admin_id: i64) -> Self {
        self.settings.admin_id = Some(admin_id);
        self
    }

    pub fn build(self) -> VkBot {
        let account_mode = self.session_settings.account_mode;
        let router = Arc::new(self.router.with_error_sink(self.error_sink));
        info!(
            account_mode = %account_mode,
            auto_accept = self.settings.auto_accept_relationships,
            admin_id = ?self.settings.admin_id,
            "step: bot built"
        );
        VkBot {
            session: LongPollSession::new(self.api.clone(), self.session_settings),
            dedup: DedupCache::with_window(self.settings.dedup_window),
            format: WireFormat::for_mode(account_mode),
            admin: AdminNotifier::new(self.api.clone(), self.settings.admin_id),
            api: self.api,
            router,
            settings: self.settings,
        }
    }
}

/// Relationship reconciliation; owns only shared handles so it can run on its own task.
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn RemoteApi>,
    router: Arc<Router>,
    admin: AdminNotifier,
    auto_accept: bool,
}

impl Reconciler {
    async fn report(&self, error: BotError) -> Result<()> {
        self.admin.notify_error(None, &error).await;
        self.router.error_sink().report(None, error)
    }

    async fn fire(&self, action: &str, user_id: i64) -> Result<()> {
        let event = Message::action_event(action, user_id);
        let replies = self.router.route_action(action, &event).await?;
        if !replies.is_empty() {
            debug!(action, user_id, discarded = replies.len(), "Discarding relationship replies");
        }
        Ok(())
    }

    /// One reconciliation pass. Only an unhandled error is returned.
    #[instrument(skip(self), fields(auto_accept = self.auto_accept))]
    pub async fn run_once(&self) -> Result<()> {
        if self.auto_accept {
            match self
                .api
                .pending_relationships(RelationshipDirection::Incoming)
                .await
            {
                Ok(ids) => {
                    for user_id in ids {
                        match self.api.accept_relationship(user_id).await {
                            Ok(true) => {
                                info!(user_id, "step: relationship accepted");
                                self.fire(ACTION_FRIEND_ADD, user_id).await?;
                            }
                            Ok(false) => warn!(user_id, "Relationship request not accepted"),
                            Err(e) => self.report(e).await?,
                        }
                    }
                }
                Err(e) => self.report(e).await?,
            }
        }

        match self
            .api
            .pending_relationships(RelationshipDirection::Outgoing)
            .await
        {
            Ok(ids) => {
                for user_id in ids {
                    match self.api.remove_relationship(user_id).await {
                        Ok(true) => {
                            info!(user_id, "step: outgoing relationship request withdrawn");
                            self.fire(ACTION_FRIEND_DELETE, user_id).await?;
                        }
                        Ok(false) => warn!(user_id, "Outgoing relationship request not removed"),
                        Err(e) => self.report(e).await?,
                    }
                }
            }
            Err(e) => self.report(e).await?,
        }
        Ok(())
    }

    /// Runs a pass immediately and then every `period` until `stop` flips to true.
    pub async fn run(self, period: Duration, mut stop: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("Reconciliation stopped");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Reconciliation failed");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// The running engine. Owns the session and dedup cache; shares the frozen router.
pub struct VkBot {
    api: Arc<dyn RemoteApi>,
    router: Arc<Router>,
    session: LongPollSession,
    dedup: DedupCache,
    format: WireFormat,
    admin: AdminNotifier,
    settings: BotSettings,
}

impl VkBot {
    pub fn builder(api: Arc<dyn RemoteApi>, account_mode: AccountMode) -> BotBuilder {
        BotBuilder::new(api, account_mode)
    }

    pub fn account_mode(&self) -> AccountMode {
        self.session.account_mode()
    }

    pub fn settings(&self) -> &BotSettings {
        &self.settings
    }

    pub fn session(&self) -> &LongPollSession {
        &self.session
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler {
            api: self.api.clone(),
            router: self.router.clone(),
            admin: self.admin.clone(),
            auto_accept: self.settings.auto_accept_relationships,
        }
    }

    pub fn admin(&self) -> &AdminNotifier {
        &self.admin
    }

    /// Every error goes to the admin and the error sink; fatal ones are also returned.
    async fn surface(&self, message: Option<&Message>, error: BotError) -> Result<()> {
        self.admin.notify_error(message, &error).await;
        if error.is_fatal() {
            error!(error = %error, "Fatal error");
            self.router.error_sink().notify(message, &error);
            return Err(error);
        }
        self.router.error_sink().report(message, error)
    }

    /// Sends one reply. On refusal, reports it and tries the fallback text once.
    async fn deliver(&self, message: &Message, reply: &Reply) -> Result<bool> {
        let target = message.reply_target();
        match self.api.send_reply(&target, reply).await {
            Ok(sent_id) => {
                debug!(message_id = message.id, sent_id, target = ?target, "step: reply sent");
                Ok(true)
            }
            Err(e) => {
                warn!(message_id = message.id, error = %e, "Reply delivery failed");
                self.surface(Some(message), e).await?;
                if self.settings.delivery_failure_text.is_empty() {
                    return Ok(false);
                }
                let fallback = Reply::text(self.settings.delivery_failure_text.clone());
                if let Err(e) = self.api.send_reply(&target, &fallback).await {
                    warn!(message_id = message.id, error = %e, "Fallback reply failed");
                    self.surface(Some(message), e).await?;
                }
                Ok(false)
            }
        }
    }

    /// Runs one ingestion cycle.
    #[instrument(skip(self), fields(cursor = %self.session.cursor()))]
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        let payload = match self.session.poll().await {
            Ok(payload) => payload,
            Err(e) => {
                self.surface(None, e).await?;
                return Ok(summary);
            }
        };
        let updates = match parse_updates(self.format, &payload.body) {
            Ok(updates) => updates,
            Err(e) => {
                self.surface(None, e).await?;
                return Ok(summary);
            }
        };

        let messages = self.dedup.admit(normalize_batch(&updates));
        summary.admitted = messages.len();
        if messages.is_empty() {
            debug!(updates = updates.len(), "step: nothing to dispatch");
            return Ok(summary);
        }

        let dispatched = self.router.dispatch(messages).await?;

        for item in &dispatched {
            for reply in &item.replies {
                if self.deliver(&item.message, reply).await? {
                    summary.replies_sent += 1;
                }
            }
        }

        for item in dispatched.iter().filter(|d| d.action_routed) {
            match self.api.mark_read(item.message.id).await {
                Ok(()) => summary.marked_read += 1,
                Err(e) => self.surface(Some(&item.message), e).await?,
            }
        }

        info!(
            admitted = summary.admitted,
            replies_sent = summary.replies_sent,
            marked_read = summary.marked_read,
            "step: cycle finished"
        );
        Ok(summary)
    }

    /// One reconciliation pass. No-op for group accounts.
    pub async fn reconcile_relationships(&self) -> Result<()> {
        if self.account_mode() != AccountMode::User {
            debug!("Skipping relationship reconciliation for group account");
            return Ok(());
        }
        self.reconciler().run_once().await
    }

    /// Runs until `shutdown` turns true or a fatal error occurs. In user mode a reconciliation
    /// task runs alongside and is stopped before returning.
    pub async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut reconcile = if self.account_mode() == AccountMode::User {
            let period = self.settings.reconcile_interval;
            Some(tokio::spawn(self.reconciler().run(period, stop_rx)))
        } else {
            None
        };

        info!(
            account_mode = %self.account_mode(),
            poll_interval = ?self.settings.poll_interval,
            "step: bot started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if reconcile.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(handle) = reconcile.take() {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break Err(e),
                        Err(e) => {
                            break Err(BotError::Handler(format!(
                                "reconciliation task aborted: {}",
                                e
                            )))
                        }
                    }
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        error!(error = %e, "Ingestion stopped");
                        break Err(e);
                    }
                }
            }
        };

        if stop_tx.send(true).is_err() {
            debug!("Reconciliation task already gone");
        }
        if let Some(handle) = reconcile {
            match handle.await {
                Ok(Ok(())) => debug!("step: reconciliation task joined"),
                Ok(Err(e)) => warn!(error = %e, "Reconciliation task ended with error"),
                Err(e) => warn!(error = %e, "Reconciliation task aborted"),
            }
        }
        info!(ok = outcome.is_ok(), "step: bot stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = BotSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(3));
        assert_eq!(settings.reconcile_interval, Duration::from_secs(30));
        assert_eq!(settings.dedup_window, Duration::from_secs(60));
        assert!(!settings.auto_accept_relationships);
        assert_eq!(
            settings.delivery_failure_text,
            "Cant send message, maybe wrong/china letters?"
        );
        assert_eq!(settings.admin_id, None);
    }

    #[test]
    fn test_error_notice_text() {
        let message = Message {
            id: 11,
            sender_id: 7,
            timestamp: 1700000000,
            ..Default::default()
        };
        let notice = error_notice(Some(&message), &BotError::Network("down".to_string()));
        assert!(notice.starts_with("vkbot error on message 11 from 7 at 2023-11-14 22:13:20 UTC:"));
        assert!(notice.contains("down"));
        assert!(error_notice(None, &BotError::Network("down".to_string())).starts_with("vkbot error:"));
    }
}
