use serde::{Deserialize, Serialize};

/// Opaque identifier of a browsing context.
pub type TabId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmName {
    Flush,
    CheckNotifications,
}

/// Activity reported by the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivityEvent {
    /// The user switched to `tab`.
    TabActivated { tab: TabInfo },
    /// A tab navigated or finished loading.
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab: TabInfo,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        status: Option<String>,
        /// Whether the tab is the active tab of the focused window.
        #[serde(default)]
        active: bool,
    },
    /// `window_id` is `None` when no browser window has focus.
    #[serde(rename_all = "camelCase")]
    WindowFocusChanged {
        window_id: Option<i64>,
        #[serde(default)]
        active_tab: Option<TabInfo>,
    },
    #[serde(rename_all = "camelCase")]
    IdleStateChanged {
        state: IdleState,
        #[serde(default)]
        active_tab: Option<TabInfo>,
    },
    Alarm { name: AlarmName },
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{ActivityEvent, AlarmName, IdleState, TabInfo};

    #[test]
    fn test_event_wire_format() -> Result<()> {
        let event: ActivityEvent = serde_json::from_value(json!({
            "kind": "tabUpdated",
            "tab": {"id": 4, "url": "https://a.com"},
            "status": "complete",
            "active": true
        }))?;
        assert_eq!(
            event,
            ActivityEvent::TabUpdated {
                tab: TabInfo {
                    id: 4,
                    url: Some("https://a.com".into())
                },
                url: None,
                status: Some("complete".into()),
                active: true,
            }
        );

        let event: ActivityEvent = serde_json::from_value(json!({
            "kind": "windowFocusChanged",
            "windowId": null
        }))?;
        assert_eq!(
            event,
            ActivityEvent::WindowFocusChanged {
                window_id: None,
                active_tab: None
            }
        );

        let event: ActivityEvent = serde_json::from_value(json!({
            "kind": "idleStateChanged",
            "state": "locked"
        }))?;
        assert!(matches!(
            event,
            ActivityEvent::IdleStateChanged {
                state: IdleState::Locked,
                ..
            }
        ));

        let event: ActivityEvent =
            serde_json::from_value(json!({"kind": "alarm", "name": "checkNotifications"}))?;
        assert_eq!(
            event,
            ActivityEvent::Alarm {
                name: AlarmName::CheckNotifications
            }
        );
        Ok(())
    }
}
