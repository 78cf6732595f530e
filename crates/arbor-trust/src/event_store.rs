//! Event store and timeline
//!
//! Append-only log of trust-affecting events with an in-memory index for
//! queries and a durable mirror through the persistence collaborator.
//! The index is bounded; on overflow the oldest tenth is pruned (the
//! durable log keeps everything). Events are keyed `(timestamp, id)` so
//! cursor pagination is stable under concurrent appends.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use arbor_common::persistence::{EventLog, PersistedEvent};
use arbor_common::{ArborError, Result, TrustEvent, TrustEventType, TrustTier};

/// Sort order for event queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    #[default]
    Ascending,
    Descending,
}

/// Stable pagination cursor, `timestamp_ms:event_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub timestamp: i64,
    pub event_id: String,
}

impl FromStr for EventCursor {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        let (timestamp, event_id) = s
            .split_once(':')
            .ok_or_else(|| ArborError::Serialization(format!("bad cursor: {}", s)))?;
        Ok(Self {
            timestamp: timestamp
                .parse()
                .map_err(|_| ArborError::Serialization(format!("bad cursor timestamp: {}", s)))?,
            event_id: event_id.to_string(),
        })
    }
}

impl std::fmt::Display for EventCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.event_id)
    }
}

/// Filters for [`EventStore::get_events`]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub agent_id: Option<String>,
    pub event_type: Option<TrustEventType>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
    pub cursor: Option<EventCursor>,
    pub order: QueryOrder,
}

impl EventFilter {
    pub fn for_agent(agent_id: &str) -> Self {
        Self {
            agent_id: Some(agent_id.to_string()),
            ..Self::default()
        }
    }
}

/// One timeline entry: the event plus the gap to the following event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event: TrustEvent,
    /// Milliseconds until the agent's next event, `None` on the latest
    pub time_to_next_ms: Option<i64>,
}

/// Score trajectory summary for one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustProgression {
    /// `(timestamp, new_score)` samples in time order
    pub samples: Vec<(i64, u8)>,
    pub min_score: Option<u8>,
    pub max_score: Option<u8>,
    /// Sum of positive deltas
    pub total_gained: i64,
    /// Sum of negative deltas, as a positive magnitude
    pub total_lost: i64,
}

impl TrustProgression {
    pub fn net(&self) -> i64 {
        self.total_gained - self.total_lost
    }
}

/// One tier transition with its direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTransition {
    pub timestamp: i64,
    pub from: TrustTier,
    pub to: TrustTier,
    pub promotion: bool,
    pub reason: Option<String>,
}

/// Per-agent event statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub total_events: usize,
    pub counts_by_type: HashMap<String, usize>,
    /// successes / (successes + failures), `None` with no actions
    pub action_success_rate: Option<f64>,
    /// passes / (passes + failures), `None` with no tests
    pub test_pass_rate: Option<f64>,
    pub first_event_at: Option<i64>,
    pub last_event_at: Option<i64>,
}

/// System-wide event statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_events: usize,
    pub distinct_agents: usize,
    pub counts_by_type: HashMap<String, usize>,
    /// Share of events in the negative set, 0.0 with no events
    pub negative_share: f64,
}

#[derive(Default)]
struct EventIndex {
    /// Total order by `(timestamp, id)`
    events: BTreeMap<(i64, String), TrustEvent>,
    /// id -> ordering key
    by_id: HashMap<String, (i64, String)>,
}

impl EventIndex {
    fn insert(&mut self, event: TrustEvent) -> Result<()> {
        if self.by_id.contains_key(&event.id) {
            return Err(ArborError::AlreadyExists(format!("event {}", event.id)));
        }
        let key = (event.timestamp, event.id.clone());
        self.by_id.insert(event.id.clone(), key.clone());
        self.events.insert(key, event);
        Ok(())
    }

    fn prune_oldest(&mut self, count: usize) {
        let keys: Vec<(i64, String)> = self.events.keys().take(count).cloned().collect();
        for key in keys {
            self.by_id.remove(&key.1);
            self.events.remove(&key);
        }
    }
}

/// Append-only trust event store
pub struct EventStore {
    index: RwLock<EventIndex>,
    max_events: usize,
    log: Option<Arc<dyn EventLog>>,
    persist_tx: Option<mpsc::UnboundedSender<PersistedEvent>>,
}

impl EventStore {
    /// Store with a durable mirror. Durable appends run on a background
    /// writer task bounded by `timeout_ms` per call; failures are logged
    /// and retried, never surfaced to the appender (the in-memory index
    /// is already advanced).
    pub fn new(max_events: usize, log: Arc<dyn EventLog>, timeout_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let timeout = std::time::Duration::from_millis(timeout_ms.max(1));
        tokio::spawn(Self::persist_loop(log.clone(), rx, timeout));
        Self {
            index: RwLock::new(EventIndex::default()),
            max_events: max_events.max(10),
            log: Some(log),
            persist_tx: Some(tx),
        }
    }

    /// Store without durability, for tests and ephemeral deployments
    pub fn in_memory(max_events: usize) -> Self {
        Self {
            index: RwLock::new(EventIndex::default()),
            max_events: max_events.max(10),
            log: None,
            persist_tx: None,
        }
    }

    /// Rebuild the in-memory index from the durable log after a restart.
    /// Events already indexed are skipped, so hydration is idempotent and
    /// safe to run next to live appends. Returns the number of events
    /// restored; only the newest `max_events` are kept.
    pub async fn hydrate(&self) -> Result<usize> {
        let Some(log) = &self.log else {
            return Ok(0);
        };
        let mut persisted = log.read_all().await?;
        // Keep only the tail that fits the index cap
        if persisted.len() > self.max_events {
            persisted.drain(..persisted.len() - self.max_events);
        }

        let mut restored = 0;
        for record in persisted {
            let event: TrustEvent = match serde_json::from_value(record.data.clone()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(event_id = %record.id, error = %e, "corrupt durable event; skipping");
                    continue;
                }
            };
            let mut index = self.index.write();
            match index.insert(event) {
                Ok(()) => restored += 1,
                Err(ArborError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if restored > 0 {
            debug!(restored, "event index hydrated from durable log");
        }
        Ok(restored)
    }

    async fn persist_loop(
        log: Arc<dyn EventLog>,
        mut rx: mpsc::UnboundedReceiver<PersistedEvent>,
        timeout: std::time::Duration,
    ) {
        while let Some(event) = rx.recv().await {
            let stream_id = event.stream_id.clone();
            match tokio::time::timeout(timeout, log.append(&stream_id, event.clone())).await {
                Ok(Ok(version)) => {
                    debug!(stream = %stream_id, version, "event persisted");
                }
                Ok(Err(ArborError::AlreadyExists(_))) => {
                    // Replay after restart; the log already has it.
                }
                Ok(Err(e)) => {
                    warn!(stream = %stream_id, error = %e, "durable append failed");
                }
                Err(_) => {
                    warn!(stream = %stream_id, "durable append timed out");
                }
            }
        }
    }

    fn to_persisted(event: &TrustEvent) -> PersistedEvent {
        PersistedEvent {
            id: event.id.clone(),
            stream_id: event.stream_id(),
            event_type: event.event_type.persisted_type(),
            timestamp: event.timestamp,
            data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            metadata: serde_json::Map::new(),
        }
    }

    /// Append one event. Duplicate ids are rejected; the durable mirror is
    /// fed asynchronously.
    pub fn append(&self, event: TrustEvent) -> Result<()> {
        {
            let mut index = self.index.write();
            index.insert(event.clone())?;
            if index.events.len() > self.max_events {
                let prune = (self.max_events / 10).max(1);
                index.prune_oldest(prune);
                debug!(pruned = prune, "event index overflow");
            }
        }
        if let Some(tx) = &self.persist_tx {
            let _ = tx.send(Self::to_persisted(&event));
        }
        Ok(())
    }

    /// Append a batch; all-or-nothing against the in-memory index
    pub fn append_many(&self, events: Vec<TrustEvent>) -> Result<()> {
        {
            let index = self.index.read();
            if let Some(dup) = events.iter().find(|e| index.by_id.contains_key(&e.id)) {
                return Err(ArborError::AlreadyExists(format!("event {}", dup.id)));
            }
        }
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }

    /// Number of events currently indexed
    pub fn len(&self) -> usize {
        self.index.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up one event by id
    pub fn get_event(&self, event_id: &str) -> Result<TrustEvent> {
        let index = self.index.read();
        index
            .by_id
            .get(event_id)
            .and_then(|key| index.events.get(key))
            .cloned()
            .ok_or_else(|| ArborError::NotFound(format!("event {}", event_id)))
    }

    /// Filtered, cursor-paginated query
    pub fn get_events(&self, filter: &EventFilter) -> Vec<TrustEvent> {
        let index = self.index.read();
        let limit = filter.limit.unwrap_or(100);

        let matches = |event: &TrustEvent| {
            if let Some(agent_id) = &filter.agent_id {
                if &event.agent_id != agent_id {
                    return false;
                }
            }
            if let Some(event_type) = filter.event_type {
                if event.event_type != event_type {
                    return false;
                }
            }
            if let Some(start) = filter.start_time {
                if event.timestamp < start {
                    return false;
                }
            }
            if let Some(end) = filter.end_time {
                if event.timestamp > end {
                    return false;
                }
            }
            true
        };

        let after_cursor = |event: &TrustEvent| match (&filter.cursor, filter.order) {
            (None, _) => true,
            (Some(cursor), QueryOrder::Ascending) => {
                (event.timestamp, &event.id) > (cursor.timestamp, &cursor.event_id)
            }
            (Some(cursor), QueryOrder::Descending) => {
                (event.timestamp, &event.id) < (cursor.timestamp, &cursor.event_id)
            }
        };

        match filter.order {
            QueryOrder::Ascending => index
                .events
                .values()
                .filter(|e| matches(e) && after_cursor(e))
                .take(limit)
                .cloned()
                .collect(),
            QueryOrder::Descending => index
                .events
                .values()
                .rev()
                .filter(|e| matches(e) && after_cursor(e))
                .take(limit)
                .cloned()
                .collect(),
        }
    }

    /// Agent's events in time order, each with the gap to the next
    pub fn agent_timeline(&self, agent_id: &str) -> Vec<TimelineEntry> {
        let events = self.get_events(&EventFilter {
            agent_id: Some(agent_id.to_string()),
            limit: Some(usize::MAX),
            ..EventFilter::default()
        });

        let mut entries: Vec<TimelineEntry> = Vec::with_capacity(events.len());
        for (i, event) in events.iter().enumerate() {
            let time_to_next_ms = events.get(i + 1).map(|next| next.timestamp - event.timestamp);
            entries.push(TimelineEntry {
                event: event.clone(),
                time_to_next_ms,
            });
        }
        entries
    }

    /// Score trajectory: samples, extremes, gained/lost totals
    pub fn trust_progression(&self, agent_id: &str) -> TrustProgression {
        let events = self.get_events(&EventFilter {
            agent_id: Some(agent_id.to_string()),
            limit: Some(usize::MAX),
            ..EventFilter::default()
        });

        let mut progression = TrustProgression::default();
        for event in &events {
            if let Some(score) = event.new_score {
                progression.samples.push((event.timestamp, score));
                progression.min_score =
                    Some(progression.min_score.map_or(score, |min| min.min(score)));
                progression.max_score =
                    Some(progression.max_score.map_or(score, |max| max.max(score)));
            }
            if let Some(delta) = event.delta {
                if delta > 0 {
                    progression.total_gained += delta as i64;
                } else {
                    progression.total_lost += (-delta) as i64;
                }
            }
        }
        progression
    }

    /// Tier transitions only, labeled promotion/demotion
    pub fn tier_history(&self, agent_id: &str) -> Vec<TierTransition> {
        self.get_events(&EventFilter {
            agent_id: Some(agent_id.to_string()),
            event_type: Some(TrustEventType::TierChanged),
            limit: Some(usize::MAX),
            ..EventFilter::default()
        })
        .into_iter()
        .filter_map(|event| {
            let from = event.previous_tier?;
            let to = event.new_tier?;
            Some(TierTransition {
                timestamp: event.timestamp,
                from,
                to,
                promotion: to > from,
                reason: event.reason,
            })
        })
        .collect()
    }

    /// Per-type counts and outcome rates for one agent
    pub fn agent_stats(&self, agent_id: &str) -> AgentStats {
        let events = self.get_events(&EventFilter {
            agent_id: Some(agent_id.to_string()),
            limit: Some(usize::MAX),
            ..EventFilter::default()
        });

        let mut stats = AgentStats {
            total_events: events.len(),
            first_event_at: events.first().map(|e| e.timestamp),
            last_event_at: events.last().map(|e| e.timestamp),
            ..AgentStats::default()
        };

        for event in &events {
            *stats
                .counts_by_type
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let successes = stats.count(TrustEventType::ActionSuccess);
        let failures = stats.count(TrustEventType::ActionFailure);
        if successes + failures > 0 {
            stats.action_success_rate = Some(successes as f64 / (successes + failures) as f64);
        }

        let passed = stats.count(TrustEventType::TestPassed);
        let failed = stats.count(TrustEventType::TestFailed);
        if passed + failed > 0 {
            stats.test_pass_rate = Some(passed as f64 / (passed + failed) as f64);
        }

        stats
    }

    /// System-wide counts and negative share
    pub fn system_stats(&self) -> SystemStats {
        let index = self.index.read();
        let mut stats = SystemStats {
            total_events: index.events.len(),
            ..SystemStats::default()
        };

        let mut agents: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut negative = 0usize;
        for event in index.events.values() {
            agents.insert(event.agent_id.as_str());
            *stats
                .counts_by_type
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
            if event.event_type.is_negative() {
                negative += 1;
            }
        }
        stats.distinct_agents = agents.len();
        if stats.total_events > 0 {
            stats.negative_share = negative as f64 / stats.total_events as f64;
        }
        stats
    }

    /// Negative events across the system since `since_ms`, newest first
    pub fn recent_negative_events(&self, since_ms: i64, limit: usize) -> Vec<TrustEvent> {
        let index = self.index.read();
        index
            .events
            .values()
            .rev()
            .filter(|e| e.timestamp >= since_ms && e.event_type.is_negative())
            .take(limit)
            .cloned()
            .collect()
    }
}

impl AgentStats {
    fn count(&self, event_type: TrustEventType) -> usize {
        self.counts_by_type
            .get(event_type.as_str())
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::persistence::MemoryEventLog;

    fn event(agent: &str, event_type: TrustEventType, ts: i64) -> TrustEvent {
        TrustEvent::new(agent, event_type, ts)
    }

    #[test]
    fn test_append_and_get() {
        let store = EventStore::in_memory(100);
        let e = event("agent-001", TrustEventType::ActionSuccess, 1000);
        let id = e.id.clone();
        store.append(e).unwrap();
        assert_eq!(store.get_event(&id).unwrap().timestamp, 1000);
        assert!(store.get_event("missing").is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = EventStore::in_memory(100);
        let e = event("agent-001", TrustEventType::ActionSuccess, 1000);
        store.append(e.clone()).unwrap();
        assert!(matches!(store.append(e), Err(ArborError::AlreadyExists(_))));
    }

    #[test]
    fn test_events_immutable_on_read() {
        let store = EventStore::in_memory(100);
        let e = event("agent-001", TrustEventType::ActionSuccess, 1000).with_reason("first");
        let id = e.id.clone();
        store.append(e).unwrap();
        let first = store.get_event(&id).unwrap();
        let second = store.get_event(&id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_overflow_prunes_oldest_tenth() {
        let store = EventStore::in_memory(100);
        for i in 0..101 {
            store
                .append(event("agent-001", TrustEventType::ActionSuccess, i))
                .unwrap();
        }
        // 101 > 100 triggered a prune of 10
        assert_eq!(store.len(), 91);
        // The oldest events are gone
        let events = store.get_events(&EventFilter::for_agent("agent-001"));
        assert_eq!(events.first().unwrap().timestamp, 10);
    }

    #[test]
    fn test_filter_by_type_and_window() {
        let store = EventStore::in_memory(1000);
        store.append(event("a", TrustEventType::ActionSuccess, 10)).unwrap();
        store.append(event("a", TrustEventType::ActionFailure, 20)).unwrap();
        store.append(event("b", TrustEventType::ActionFailure, 30)).unwrap();
        store.append(event("a", TrustEventType::ActionFailure, 40)).unwrap();

        let failures = store.get_events(&EventFilter {
            agent_id: Some("a".to_string()),
            event_type: Some(TrustEventType::ActionFailure),
            start_time: Some(15),
            end_time: Some(35),
            ..EventFilter::default()
        });
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].timestamp, 20);
    }

    #[test]
    fn test_cursor_pagination_no_overlap() {
        let store = EventStore::in_memory(1000);
        for i in 0..10 {
            store
                .append(event("a", TrustEventType::ActionSuccess, i / 3))
                .unwrap();
        }

        let mut seen: Vec<String> = Vec::new();
        let mut cursor: Option<EventCursor> = None;
        loop {
            let page = store.get_events(&EventFilter {
                agent_id: Some("a".to_string()),
                limit: Some(3),
                cursor: cursor.clone(),
                ..EventFilter::default()
            });
            if page.is_empty() {
                break;
            }
            for e in &page {
                assert!(!seen.contains(&e.id), "page overlap at {}", e.id);
                seen.push(e.id.clone());
            }
            let last = page.last().unwrap();
            cursor = Some(last.cursor().parse().unwrap());
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_cursor_stable_under_concurrent_append() {
        let store = EventStore::in_memory(1000);
        for i in 0..6 {
            store.append(event("a", TrustEventType::ActionSuccess, i)).unwrap();
        }
        let page = store.get_events(&EventFilter {
            limit: Some(3),
            ..EventFilter::default()
        });
        let cursor: EventCursor = page.last().unwrap().cursor().parse().unwrap();

        // New events arrive after the cursor position
        store.append(event("a", TrustEventType::ActionSuccess, 100)).unwrap();

        let next = store.get_events(&EventFilter {
            limit: Some(10),
            cursor: Some(cursor),
            ..EventFilter::default()
        });
        // Strictly after the cursor, includes the new event, no repeats
        assert_eq!(next.len(), 4);
        for e in &next {
            assert!(!page.iter().any(|p| p.id == e.id));
        }
    }

    #[test]
    fn test_descending_order() {
        let store = EventStore::in_memory(1000);
        for i in 0..5 {
            store.append(event("a", TrustEventType::ActionSuccess, i)).unwrap();
        }
        let events = store.get_events(&EventFilter {
            order: QueryOrder::Descending,
            ..EventFilter::default()
        });
        assert_eq!(events[0].timestamp, 4);
        assert_eq!(events[4].timestamp, 0);
    }

    #[test]
    fn test_timeline_gaps() {
        let store = EventStore::in_memory(1000);
        store.append(event("a", TrustEventType::ActionSuccess, 100)).unwrap();
        store.append(event("a", TrustEventType::ActionSuccess, 250)).unwrap();
        store.append(event("a", TrustEventType::ActionFailure, 400)).unwrap();

        let timeline = store.agent_timeline("a");
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].time_to_next_ms, Some(150));
        assert_eq!(timeline[1].time_to_next_ms, Some(150));
        assert_eq!(timeline[2].time_to_next_ms, None);
    }

    #[test]
    fn test_trust_progression() {
        let store = EventStore::in_memory(1000);
        store
            .append(event("a", TrustEventType::ActionSuccess, 1).with_scores(10, 20))
            .unwrap();
        store
            .append(event("a", TrustEventType::SecurityViolation, 2).with_scores(20, 5))
            .unwrap();
        store
            .append(event("a", TrustEventType::ActionSuccess, 3).with_scores(5, 12))
            .unwrap();

        let progression = store.trust_progression("a");
        assert_eq!(progression.samples.len(), 3);
        assert_eq!(progression.min_score, Some(5));
        assert_eq!(progression.max_score, Some(20));
        assert_eq!(progression.total_gained, 17);
        assert_eq!(progression.total_lost, 15);
        assert_eq!(progression.net(), 2);
    }

    #[test]
    fn test_tier_history_labels() {
        let store = EventStore::in_memory(1000);
        store
            .append(
                event("a", TrustEventType::TierChanged, 1)
                    .with_tiers(TrustTier::Untrusted, TrustTier::Probationary),
            )
            .unwrap();
        store
            .append(
                event("a", TrustEventType::TierChanged, 2)
                    .with_tiers(TrustTier::Probationary, TrustTier::Untrusted),
            )
            .unwrap();

        let history = store.tier_history("a");
        assert_eq!(history.len(), 2);
        assert!(history[0].promotion);
        assert!(!history[1].promotion);
    }

    #[test]
    fn test_agent_stats_rates() {
        let store = EventStore::in_memory(1000);
        store.append(event("a", TrustEventType::ActionSuccess, 1)).unwrap();
        store.append(event("a", TrustEventType::ActionSuccess, 2)).unwrap();
        store.append(event("a", TrustEventType::ActionFailure, 3)).unwrap();
        store.append(event("a", TrustEventType::TestPassed, 4)).unwrap();

        let stats = store.agent_stats("a");
        assert_eq!(stats.total_events, 4);
        let rate = stats.action_success_rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.test_pass_rate, Some(1.0));
        assert_eq!(stats.first_event_at, Some(1));
        assert_eq!(stats.last_event_at, Some(4));
    }

    #[test]
    fn test_system_stats_and_negatives() {
        let store = EventStore::in_memory(1000);
        store.append(event("a", TrustEventType::ActionSuccess, 1)).unwrap();
        store.append(event("b", TrustEventType::SecurityViolation, 2)).unwrap();

        let stats = store.system_stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.distinct_agents, 2);
        assert!((stats.negative_share - 0.5).abs() < 1e-9);

        let negatives = store.recent_negative_events(0, 10);
        assert_eq!(negatives.len(), 1);
        assert_eq!(negatives[0].agent_id, "b");
    }

    #[tokio::test]
    async fn test_hydrate_restores_index() {
        let log = Arc::new(MemoryEventLog::new());
        {
            let store = EventStore::new(1000, log.clone(), 5_000);
            for i in 0..3 {
                store
                    .append(event("agent-001", TrustEventType::ActionSuccess, i))
                    .unwrap();
            }
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        }

        // A fresh store (fresh process) rebuilds from the log
        let restarted = EventStore::new(1000, log.clone(), 5_000);
        assert!(restarted.is_empty());
        let restored = restarted.hydrate().await.unwrap();
        assert_eq!(restored, 3);
        assert_eq!(restarted.len(), 3);

        // Hydration is idempotent
        assert_eq!(restarted.hydrate().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_durable_mirror_shape() {
        let log = Arc::new(MemoryEventLog::new());
        let store = EventStore::new(1000, log.clone(), 5_000);
        store
            .append(event("agent-001", TrustEventType::ActionSuccess, 5))
            .unwrap();

        // Give the writer task a turn
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let persisted = log.read_stream("trust:agent-001").await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].event_type, "arbor.trust.action_success");
    }

    #[test]
    fn test_cursor_parse() {
        let cursor: EventCursor = "1700000000000:evt-1".parse().unwrap();
        assert_eq!(cursor.timestamp, 1_700_000_000_000);
        assert_eq!(cursor.event_id, "evt-1");
        assert!("garbage".parse::<EventCursor>().is_err());
    }
}
