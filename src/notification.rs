//! Notification listeners.
//!
//! Listeners subscribe to a [`NotificationType`] and receive every [`Notification`] of that type.
//! Sending copies the listener list under a read lock and invokes listeners outside of it, so a
//! listener may add or remove listeners (including itself) without deadlocking.
use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use serde::Serialize;
use uuid::Uuid;

use crate::{decision::DecisionSource, events::UserEvent, Attributes};

/// Topics a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A decision was made.
    Decision,
    /// A new datafile revision was installed.
    ProjectConfigUpdate,
    /// A conversion was tracked.
    Track,
    /// An event was handed to the event processor.
    LogEvent,
}

/// A notification delivered to listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Notification {
    /// See [`DecisionNotification`].
    Decision(DecisionNotification),
    /// See [`ProjectConfigUpdateNotification`].
    ProjectConfigUpdate(ProjectConfigUpdateNotification),
    /// See [`TrackNotification`].
    Track(TrackNotification),
    /// See [`LogEventNotification`].
    LogEvent(LogEventNotification),
}

impl Notification {
    /// The topic this notification is delivered on.
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Notification::Decision(_) => NotificationType::Decision,
            Notification::ProjectConfigUpdate(_) => NotificationType::ProjectConfigUpdate,
            Notification::Track(_) => NotificationType::Track,
            Notification::LogEvent(_) => NotificationType::LogEvent,
        }
    }
}

/// What kind of decision a [`DecisionNotification`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionNotificationType {
    /// A flag decision.
    Feature,
    /// A plain experiment decision.
    AbTest,
    /// A flag variable lookup.
    FeatureVariable,
}

/// Emitted for every decision made through the decision service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotification {
    /// What was decided.
    #[serde(rename = "type")]
    pub decision_type: DecisionNotificationType,
    /// User the decision was made for.
    pub user_id: String,
    /// User attributes at decision time.
    pub attributes: Attributes,
    /// Decision details.
    pub decision_info: DecisionInfo,
}

/// Details of a decision. Fields that do not apply to the decision type are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInfo {
    /// Decided flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_key: Option<String>,
    /// Decided experiment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_key: Option<String>,
    /// Rule that produced the variation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<String>,
    /// Selected variation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_key: Option<String>,
    /// Whether the flag is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Stage that produced the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DecisionSource>,
    /// Requested variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_key: Option<String>,
    /// Resolved variable value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_value: Option<serde_json::Value>,
    /// Prediction the variation came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmab_uuid: Option<Uuid>,
}

/// Emitted when a new configuration revision is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfigUpdateNotification {
    /// Revision that was installed.
    pub revision: String,
}

/// Emitted for every tracked conversion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackNotification {
    /// Tracked event.
    pub event_key: String,
    /// User who converted.
    pub user_id: String,
    /// User attributes at tracking time.
    pub attributes: Attributes,
    /// Tags passed by the caller.
    pub event_tags: HashMap<String, serde_json::Value>,
}

/// Emitted for every event handed to the event processor.
#[derive(Debug, Clone, Serialize)]
pub struct LogEventNotification {
    /// The dispatched event.
    pub event: UserEvent,
}

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Registry of notification listeners.
#[derive(Default)]
pub struct NotificationCenter {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<NotificationType, Vec<(u64, Handler)>>>,
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("NotificationCenter")
            .field(
                "handlers",
                &handlers
                    .iter()
                    .map(|(k, v)| (*k, v.len()))
                    .collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}

impl NotificationCenter {
    /// Create a center with no listeners.
    pub fn new() -> NotificationCenter {
        NotificationCenter::default()
    }

    /// Register a listener and return its id.
    pub fn add_handler(
        &self,
        notification_type: NotificationType,
        handler: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(notification_type)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a listener by id. Unknown ids are ignored.
    pub fn remove_handler(&self, id: u64) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for list in handlers.values_mut() {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Remove every listener of a topic.
    pub fn clear(&self, notification_type: NotificationType) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&notification_type);
    }

    /// Deliver a notification to every listener of its topic.
    ///
    /// Listener panics are caught and logged.
    pub fn send(&self, notification: &Notification) {
        let notification_type = notification.notification_type();
        let handlers: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&notification_type) {
                Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
                None => return,
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
                log::warn!(target: "optiflag", notification_type:? = notification_type;
                           "notification listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{Notification, NotificationCenter, NotificationType, ProjectConfigUpdateNotification};

    fn update(revision: &str) -> Notification {
        Notification::ProjectConfigUpdate(ProjectConfigUpdateNotification {
            revision: revision.to_owned(),
        })
    }

    #[test]
    fn delivers_to_matching_topic_only() {
        let center = NotificationCenter::new();
        let updates = Arc::new(AtomicUsize::new(0));
        let tracks = Arc::new(AtomicUsize::new(0));
        {
            let updates = updates.clone();
            center.add_handler(NotificationType::ProjectConfigUpdate, move |_| {
                updates.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let tracks = tracks.clone();
            center.add_handler(NotificationType::Track, move |_| {
                tracks.fetch_add(1, Ordering::SeqCst);
            });
        }

        center.send(&update("1"));

        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(tracks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let center = NotificationCenter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = {
            let count = count.clone();
            center.add_handler(NotificationType::ProjectConfigUpdate, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        center.remove_handler(id);
        center.remove_handler(id);
        center.remove_handler(12345);
        center.send(&update("1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ids_are_unique() {
        let center = NotificationCenter::new();
        let a = center.add_handler(NotificationType::Decision, |_| {});
        let b = center.add_handler(NotificationType::Decision, |_| {});
        assert_ne!(a, b);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let center = NotificationCenter::new();
        let count = Arc::new(AtomicUsize::new(0));
        center.add_handler(NotificationType::ProjectConfigUpdate, |_| panic!("listener bug"));
        {
            let count = count.clone();
            center.add_handler(NotificationType::ProjectConfigUpdate, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        center.send(&update("1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_reenter_registry() {
        let center = Arc::new(NotificationCenter::new());
        let inner = center.clone();
        center.add_handler(NotificationType::ProjectConfigUpdate, move |_| {
            inner.add_handler(NotificationType::Track, |_| {});
        });
        center.send(&update("1"));
    }
}
