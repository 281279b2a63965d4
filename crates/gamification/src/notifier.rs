use serde::Serialize;
use storage::models::XpEvent;

/// Payload handed to the delivery layer when badges are granted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeAwardedNotification {
    pub user_id: String,
    pub badges: Vec<String>,
    pub event: Option<XpEvent>,
}

pub trait BadgeNotifier: Send + Sync {
    fn badges_awarded(&self, notification: &BadgeAwardedNotification);
}

/// Emits notifications as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl BadgeNotifier for TracingNotifier {
    fn badges_awarded(&self, notification: &BadgeAwardedNotification) {
        tracing::info!(
            user_id = %notification.user_id,
            badges = ?notification.badges,
            event = ?notification.event,
            "Badges awarded"
        );
    }
}
