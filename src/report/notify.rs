use tracing::{debug, info};

use crate::{
    error::StoreError,
    settings::NotificationSettings,
    storage::{
        aggregate::AggregateStore,
        documents::{read_document, write_document, LAST_NOTIFICATION_KEY},
        kv::KeyValueStore,
    },
    tracker::bus::{EventBus, Outbound},
    utils::time::{date_key, Period},
};

/// Delivers a user-facing notification.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier {
    fn notify(&self, title: &str, message: &str);
}

/// Hands notifications to whoever listens on the bus, which for the host is the browser side.
pub struct BusNotifier {
    bus: EventBus,
}

impl BusNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!("Notifying: {title}");
        self.bus.publish(Outbound::Notification {
            title: title.to_owned(),
            message: message.to_owned(),
        });
    }
}

/// Fires at most one notification per calendar day when today's usage reaches a per-site
/// threshold or, failing that, the global limit. Returns whether a notification was sent.
pub async fn check_notifications<K: KeyValueStore>(
    store: &AggregateStore<K>,
    settings: &NotificationSettings,
    notifier: &dyn Notifier,
) -> Result<bool, StoreError> {
    if !settings.enabled {
        return Ok(false);
    }

    let today = date_key(store.today());
    let last_notified: Option<String> = read_document(store.kv(), LAST_NOTIFICATION_KEY).await?;
    if last_notified.as_deref() == Some(today.as_str()) {
        debug!("Already notified today");
        return Ok(false);
    }

    let summary = store.summary(Period::Day, None, None).await?;

    for (site_key, limit) in &settings.thresholds {
        let Some(totals) = summary.sites.get(site_key) else {
            continue;
        };
        let minutes = totals.seconds / 60;
        if minutes >= *limit {
            notifier.notify(
                &format!("Time Limit Reached: {site_key}"),
                &format!(
                    "You've spent {minutes} minutes on {site_key} today (limit: {limit} minutes)."
                ),
            );
            write_document(store.kv(), LAST_NOTIFICATION_KEY, &today).await?;
            return Ok(true);
        }
    }

    if let Some(limit) = settings.global_limit.filter(|limit| *limit > 0) {
        let total_minutes = summary
            .sites
            .values()
            .map(|totals| totals.seconds / 60)
            .sum::<u64>();
        if total_minutes >= limit {
            notifier.notify(
                "Daily Time Limit Reached",
                &format!(
                    "You've spent {total_minutes} minutes on tracked sites today (limit: {limit} minutes)."
                ),
            );
            write_document(store.kv(), LAST_NOTIFICATION_KEY, &today).await?;
            return Ok(true);
        }
    }

    Ok(false)
}
