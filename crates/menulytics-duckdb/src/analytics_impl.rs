use async_trait::async_trait;

use menulytics_core::analytics::{AnalyticsBackend, EventQuery};
use menulytics_core::event::Event;

use crate::DuckDbBackend;

#[async_trait]
impl AnalyticsBackend for DuckDbBackend {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<()> {
        DuckDbBackend::insert_events(self, std::slice::from_ref(event))
            .await
            .map(|_| ())
    }

    async fn insert_events(&self, events: &[Event]) -> anyhow::Result<()> {
        DuckDbBackend::insert_events(self, events).await.map(|_| ())
    }

    async fn select_events(&self, query: &EventQuery) -> anyhow::Result<Vec<Event>> {
        crate::queries::events::select_events_inner(self, query).await
    }
}
