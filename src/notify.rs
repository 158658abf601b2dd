use std::collections::VecDeque;

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::MAX_INBOX_LEN;
use crate::model::{Notification, OwnerId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-owner notification fan-out plus a bounded inbox, newest first.
pub struct NotifyHub {
    channels: DashMap<OwnerId, broadcast::Sender<Notification>>,
    inboxes: DashMap<OwnerId, VecDeque<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            inboxes: DashMap::new(),
        }
    }

    /// Subscribe to live notifications for an owner. Creates the channel if needed.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Store in the recipient's inbox and broadcast. Never blocks, never fails.
    pub fn publish(&self, notification: Notification) {
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "kind" => notification.kind.as_str())
            .increment(1);
        {
            let mut inbox = self
                .inboxes
                .entry(notification.recipient_id.clone())
                .or_default();
            inbox.push_front(notification.clone());
            inbox.truncate(MAX_INBOX_LEN);
        }
        if let Some(sender) = self.channels.get(&notification.recipient_id) {
            let _ = sender.send(notification);
        }
    }

    pub fn inbox(&self, owner_id: &str) -> Vec<Notification> {
        self.inboxes
            .get(owner_id)
            .map(|e| e.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, owner_id: &str) -> usize {
        self.inboxes
            .get(owner_id)
            .map_or(0, |e| e.value().iter().filter(|n| !n.read).count())
    }

    /// Returns false if the notification is not in the owner's inbox.
    pub fn mark_read(&self, owner_id: &str, id: Ulid) -> bool {
        let Some(mut inbox) = self.inboxes.get_mut(owner_id) else {
            return false;
        };
        match inbox.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Returns how many notifications flipped from unread to read.
    pub fn mark_all_read(&self, owner_id: &str) -> usize {
        let Some(mut inbox) = self.inboxes.get_mut(owner_id) else {
            return 0;
        };
        let mut flipped = 0;
        for n in inbox.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        flipped
    }

    pub fn dismiss(&self, owner_id: &str, id: Ulid) -> bool {
        let Some(mut inbox) = self.inboxes.get_mut(owner_id) else {
            return false;
        };
        let before = inbox.len();
        inbox.retain(|n| n.id != id);
        inbox.len() != before
    }

    /// Drop an owner's live channel (session teardown). The inbox is kept.
    pub fn remove(&self, owner_id: &str) {
        self.channels.remove(owner_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotificationKind;
    use chrono::NaiveDate;

    fn note(recipient: &str, title: &str) -> Notification {
        Notification {
            id: Ulid::new(),
            kind: NotificationKind::BlockAdded,
            recipient_id: recipient.into(),
            title: title.into(),
            description: String::new(),
            booking_id: None,
            metadata: serde_json::Value::Null,
            created_at: NaiveDate::from_ymd_opt(2024, 5, 22)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            read: false,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("sara");

        let n = note("sara", "Availability block added");
        hub.publish(n.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, n);
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_fills_inbox() {
        let hub = NotifyHub::new();
        hub.publish(note("sara", "first"));
        hub.publish(note("sara", "second"));
        let inbox = hub.inbox("sara");
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].title, "second"); // newest first
        assert_eq!(hub.unread_count("sara"), 2);
    }

    #[tokio::test]
    async fn other_owners_do_not_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("abc-studios");
        hub.publish(note("sara", "not yours"));
        assert!(rx.try_recv().is_err());
        assert!(hub.inbox("abc-studios").is_empty());
    }

    #[test]
    fn mark_read_and_dismiss() {
        let hub = NotifyHub::new();
        let a = note("sara", "a");
        let b = note("sara", "b");
        hub.publish(a.clone());
        hub.publish(b.clone());

        assert!(hub.mark_read("sara", a.id));
        assert!(!hub.mark_read("sara", Ulid::new()));
        assert!(!hub.mark_read("nobody", a.id));
        assert_eq!(hub.unread_count("sara"), 1);

        assert_eq!(hub.mark_all_read("sara"), 1);
        assert_eq!(hub.mark_all_read("sara"), 0);

        assert!(hub.dismiss("sara", a.id));
        assert!(!hub.dismiss("sara", a.id));
        assert_eq!(hub.inbox("sara"), vec![Notification { read: true, ..b }]);
    }

    #[test]
    fn inbox_is_bounded() {
        let hub = NotifyHub::new();
        for i in 0..MAX_INBOX_LEN + 10 {
            hub.publish(note("sara", &format!("n{i}")));
        }
        let inbox = hub.inbox("sara");
        assert_eq!(inbox.len(), MAX_INBOX_LEN);
        assert_eq!(inbox[0].title, format!("n{}", MAX_INBOX_LEN + 9));
    }
}
