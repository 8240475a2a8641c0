use std::sync::Arc;

use tracing::{instrument, warn};

use crate::{
    error::TrackerError,
    report::Reports,
    rules::{book::RuleBook, matcher::RuleSet},
    settings::{load_settings, save_settings},
    storage::{aggregate::AggregateStore, kv::KeyValueStore},
    tracker::state::SessionTracker,
    utils::clock::Clock,
};

use super::{Envelope, Request, Response, ResponseData};

/// Answers requests. Every failure becomes an error response, nothing propagates to the caller.
pub struct RequestHandler<K> {
    reports: Reports<K>,
    clock: Arc<dyn Clock>,
}

impl<K: KeyValueStore> RequestHandler<K> {
    pub fn new(store: Arc<AggregateStore<K>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            reports: Reports::new(store),
            clock,
        }
    }

    pub async fn handle_envelope(
        &self,
        envelope: Envelope,
        tracker: &mut SessionTracker<K>,
    ) -> Response {
        match Request::parse(envelope) {
            Ok(request) => self.handle(request, tracker).await,
            Err(e) => {
                warn!("Rejecting request: {e}");
                Response::from(&e)
            }
        }
    }

    #[instrument(skip(self, tracker))]
    pub async fn handle(&self, request: Request, tracker: &mut SessionTracker<K>) -> Response {
        match self.dispatch(request, tracker).await {
            Ok(data) => Response::Data(data),
            Err(e) => {
                warn!("Request failed: {e}");
                Response::from(&e)
            }
        }
    }

    fn rule_book(&self) -> RuleBook<&K> {
        RuleBook::new(self.reports.store().kv(), self.clock.clone())
    }

    async fn dispatch(
        &self,
        request: Request,
        tracker: &mut SessionTracker<K>,
    ) -> Result<ResponseData, TrackerError> {
        let data = match request {
            Request::GetSummary(query) => ResponseData::SummaryData {
                summary: self
                    .reports
                    .summary(query.period, query.site_key.as_deref(), query.date)
                    .await?,
            },
            Request::GetSeries(query) => ResponseData::SeriesData {
                series: self
                    .reports
                    .series(query.period, query.site_key.as_deref())
                    .await?,
            },
            Request::GetCurrentSession => ResponseData::CurrentSessionData {
                state: tracker.current_state(),
            },
            Request::GetRules => ResponseData::RulesData {
                rules: self.rule_book().list().await?,
            },
            Request::AddRule(draft) => {
                let rule = self.rule_book().add(draft).await?;
                self.refresh_rules(tracker).await?;
                ResponseData::RuleData { rule: Some(rule) }
            }
            Request::UpdateRule(update) => {
                let rule = self
                    .rule_book()
                    .update(&update.rule_id, update.updates)
                    .await?;
                self.refresh_rules(tracker).await?;
                ResponseData::RuleData { rule }
            }
            Request::RemoveRule(rule) => {
                let removed = self.rule_book().remove(&rule.rule_id).await?;
                self.refresh_rules(tracker).await?;
                ResponseData::RuleRemoved { removed }
            }
            Request::GetSettings => ResponseData::SettingsData {
                settings: load_settings(self.reports.store().kv()).await?,
            },
            Request::UpdateSettings(partial) => {
                let current = load_settings(self.reports.store().kv()).await?;
                let settings = current.merged_with(partial)?;
                save_settings(self.reports.store().kv(), &settings).await?;
                tracker.set_settings(settings.clone());
                ResponseData::SettingsData { settings }
            }
            Request::ClearData(query) => ResponseData::DataCleared {
                removed: self.reports.clear(query.before).await?,
            },
            Request::ExportCsv(query) => ResponseData::CsvData {
                csv: self
                    .reports
                    .export_csv(query.period, query.site_key.as_deref())
                    .await?,
            },
        };
        Ok(data)
    }

    async fn refresh_rules(&self, tracker: &mut SessionTracker<K>) -> Result<(), TrackerError> {
        tracker.set_rules(RuleSet::new(self.rule_book().list().await?));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::json;

    use crate::{
        protocol::{Envelope, Request, Response, ResponseData},
        rules::matcher::RuleSet,
        settings::Settings,
        storage::{aggregate::AggregateStore, kv::MemoryStore},
        tracker::{
            bus::EventBus,
            events::{ActivityEvent, TabInfo},
            state::SessionTracker,
        },
        utils::clock::{
            testing::{local_time, ManualClock},
            Clock,
        },
    };

    use super::RequestHandler;

    struct Fixture {
        handler: RequestHandler<MemoryStore>,
        tracker: SessionTracker<MemoryStore>,
        store: Arc<AggregateStore<MemoryStore>>,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(local_time(2024, 3, 15, 12, 0, 0)));
        let store = Arc::new(AggregateStore::new(MemoryStore::new(), clock.clone()));
        Fixture {
            handler: RequestHandler::new(store.clone(), clock.clone()),
            tracker: SessionTracker::new(
                store.clone(),
                clock,
                EventBus::new(),
                Settings::default(),
                RuleSet::default(),
            ),
            store,
        }
    }

    async fn send(fixture: &mut Fixture, value: serde_json::Value) -> Result<serde_json::Value> {
        let envelope: Envelope = serde_json::from_value(value)?;
        let response = fixture
            .handler
            .handle_envelope(envelope, &mut fixture.tracker)
            .await;
        Ok(serde_json::to_value(response)?)
    }

    #[tokio::test]
    async fn test_unknown_type_is_error_response() -> Result<()> {
        let mut fixture = fixture();
        let response = send(&mut fixture, json!({"type": "SELF_DESTRUCT"})).await?;
        assert_eq!(
            response,
            json!({"type": "ERROR", "error": "Unknown message type: SELF_DESTRUCT"})
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_and_clear() -> Result<()> {
        let mut fixture = fixture();
        fixture
            .store
            .merge_session("a.com", 120, 2, local_time(2024, 3, 10, 12, 0, 0))
            .await?;
        fixture
            .store
            .merge_session("a.com", 60, 1, local_time(2023, 12, 31, 12, 0, 0))
            .await?;

        let response = send(
            &mut fixture,
            json!({"type": "GET_SUMMARY", "payload": {"period": "week", "date": "2024-03-15"}}),
        )
        .await?;
        assert_eq!(
            response["payload"]["summary"]["sites"]["a.com"],
            json!({"seconds": 120, "visits": 2})
        );

        let response = send(
            &mut fixture,
            json!({"type": "CLEAR_DATA", "payload": {"before": "2024-01-01"}}),
        )
        .await?;
        assert_eq!(response, json!({"type": "DATA_CLEARED", "payload": {"removed": 1}}));
        Ok(())
    }

    #[tokio::test]
    async fn test_rule_changes_reach_tracker() -> Result<()> {
        let mut fixture = fixture();
        let response = send(
            &mut fixture,
            json!({"type": "ADD_RULE", "payload": {"type": "domain", "value": "Example.com"}}),
        )
        .await?;
        assert_eq!(response["type"], json!("RULE_DATA"));
        let rule_id = response["payload"]["rule"]["id"].clone();

        let duplicate = send(
            &mut fixture,
            json!({"type": "ADD_RULE", "payload": {"type": "domain", "value": "example.com"}}),
        )
        .await?;
        assert_eq!(duplicate, json!({"type": "ERROR", "error": "Rule already exists"}));

        fixture
            .tracker
            .handle_event(ActivityEvent::TabActivated {
                tab: TabInfo {
                    id: 1,
                    url: Some("https://news.example.com".into()),
                },
            })
            .await;
        assert_eq!(
            fixture.tracker.session().map(|s| s.site_key.as_str()),
            Some("example.com")
        );

        let response = send(
            &mut fixture,
            json!({"type": "REMOVE_RULE", "payload": {"ruleId": rule_id}}),
        )
        .await?;
        assert_eq!(response["payload"]["removed"], json!(true));

        let response = send(
            &mut fixture,
            json!({"type": "UPDATE_RULE", "payload": {"ruleId": "missing", "updates": {"enabled": false}}}),
        )
        .await?;
        assert_eq!(response, json!({"type": "RULE_DATA", "payload": {"rule": null}}));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_settings_applies_to_tracker() -> Result<()> {
        let mut fixture = fixture();
        let response = send(
            &mut fixture,
            json!({"type": "UPDATE_SETTINGS", "payload": {"visitGapSeconds": 5}}),
        )
        .await?;
        assert_eq!(response["payload"]["settings"]["visitGapSeconds"], json!(5));
        assert_eq!(fixture.tracker.settings().visit_gap_seconds, 5);

        let response = send(&mut fixture, json!({"type": "GET_SETTINGS"})).await?;
        assert_eq!(response["payload"]["settings"]["visitGapSeconds"], json!(5));
        assert_eq!(response["payload"]["settings"]["heartbeatMs"], json!(1000));
        Ok(())
    }

    #[tokio::test]
    async fn test_current_session_and_csv() -> Result<()> {
        let mut fixture = fixture();
        let response = fixture
            .handler
            .handle(Request::GetCurrentSession, &mut fixture.tracker)
            .await;
        assert_eq!(
            response,
            Response::Data(ResponseData::CurrentSessionData {
                state: fixture.tracker.current_state()
            })
        );

        fixture
            .store
            .merge_session("a.com", 60, 1, local_time(2024, 3, 15, 12, 0, 0))
            .await?;
        let response = send(
            &mut fixture,
            json!({"type": "EXPORT_CSV", "payload": {"period": "day"}}),
        )
        .await?;
        assert_eq!(
            response["payload"]["csv"],
            json!("date,siteKey,secondsSpent,minutesSpent,visits\n2024-03-15,a.com,60,1,1\n")
        );
        Ok(())
    }
}
