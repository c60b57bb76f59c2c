//! Event synchronization engine.
//!
//! Owns the in-memory event collection and keeps it consistent with two
//! stores: the remote events API (authoritative) and the local cache (one key
//! holding the whole collection as JSON).
//!
//! - Reads go remote-first and degrade to the cache, then to an empty list.
//! - Creates are local-first: when the remote is unreachable the event gets a
//!   temporary `EventId::Local` id and is uploaded by a later `reconcile()`.
//! - Updates are optimistic: a failed remote update is still applied locally,
//!   flagged `pending_update` and retried by `reconcile()`.
//! - Deletes of server-known events are conservative: nothing is removed
//!   locally until the remote confirms.
//!
//! Every mutating operation runs under a single writer lock, so concurrent
//! callers are applied one after another instead of overwriting each other's
//! snapshot. Reads and derived views never wait on the writer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::db::models::{
    Event, EventDraft, EventId, EventKind, EventType, LifecycleState, Participant,
};
use crate::db::LocalCache;
use crate::error::{AppError, AppResult};
use crate::services::collaborators::{
    Alert, AlertLevel, AlertSink, Clock, SystemClock, TracingAlertSink,
};
use crate::services::gateway::{EventPayload, RemoteEvent, RemoteGateway};
use crate::services::lifecycle::{classify, reclassify_all};
use crate::services::{teams, temporal};

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub id: EventId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdMapping {
    pub local: EventId,
    pub remote: EventId,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Local-only events accepted by the remote.
    pub created: Vec<IdMapping>,
    /// Server-known events whose pending edit was delivered.
    pub updated: Vec<EventId>,
    pub failures: Vec<SyncFailure>,
}

impl ReconcileReport {
    pub fn remote_id_for(&self, local: &EventId) -> Option<&EventId> {
        self.created
            .iter()
            .find(|m| &m.local == local)
            .map(|m| &m.remote)
    }
}

/// Outcome of `clear_past_events`. Failures leave their events in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClearReport {
    pub deleted: Vec<EventId>,
    pub failures: Vec<SyncFailure>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct EventSyncEngine {
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<dyn LocalCache>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    cache_key: String,
    events: watch::Sender<Vec<Event>>,
    writer: Mutex<()>,
    hydrated: AtomicBool,
    next_local_id: AtomicU64,
    /// Temporary ids already uploaded, mapped to their server ids.
    uploaded: StdMutex<HashMap<EventId, EventId>>,
}

impl EventSyncEngine {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<dyn LocalCache>,
        cache_key: impl Into<String>,
    ) -> Self {
        let (events, _) = watch::channel(Vec::new());
        Self {
            gateway,
            cache,
            alerts: Arc::new(TracingAlertSink),
            clock: Arc::new(SystemClock),
            cache_key: cache_key.into(),
            events,
            writer: Mutex::new(()),
            hydrated: AtomicBool::new(false),
            next_local_id: AtomicU64::new(1),
            uploaded: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Receiver that observes every committed collection.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Event>> {
        self.events.subscribe()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Look up an event. A temporary id that was uploaded since the caller
    /// obtained it resolves to the server-known event.
    pub fn get_event(&self, id: &EventId) -> Option<Event> {
        let id = self.resolve_id(id);
        self.events.borrow().iter().find(|e| e.id == id).cloned()
    }

    pub fn events_in_state(&self, state: LifecycleState) -> Vec<Event> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.lifecycle_state == state)
            .cloned()
            .collect()
    }

    pub fn active_events(&self) -> Vec<Event> {
        self.events_in_state(LifecycleState::Active)
    }

    pub fn upcoming_events(&self) -> Vec<Event> {
        self.events_in_state(LifecycleState::Upcoming)
    }

    pub fn past_events(&self) -> Vec<Event> {
        self.events_in_state(LifecycleState::Past)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Fetch every event and its participants from the remote, falling back to
    /// the cache. Always resolves to some collection, possibly empty.
    pub async fn load(&self) -> Vec<Event> {
        let _guard = self.writer.lock().await;
        self.load_locked().await
    }

    pub async fn add_event(&self, draft: EventDraft) -> AppResult<Event> {
        let _guard = self.writer.lock().await;
        self.hydrate_locked().await?;
        self.add_locked(draft).await
    }

    /// Replace an existing event with `event`. On remote failure the change
    /// stays applied locally and the error is returned for the caller to show.
    pub async fn update_event(&self, event: Event) -> AppResult<Event> {
        let _guard = self.writer.lock().await;
        self.hydrate_locked().await?;
        self.update_locked(event).await
    }

    /// Apply `edit` to the current copy of an event and push the result.
    ///
    /// The read, the edit and the write happen under the writer lock, so
    /// changes committed by other callers in the meantime are kept.
    pub async fn edit_event<F>(&self, id: &EventId, edit: F) -> AppResult<Event>
    where
        F: FnOnce(&mut Event) -> AppResult<()> + Send,
    {
        let _guard = self.writer.lock().await;
        self.hydrate_locked().await?;

        let mut event = self
            .get_event(id)
            .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;
        edit(&mut event)?;
        self.update_locked(event).await
    }

    /// Add `amount` to the event's current value and push the change.
    pub async fn record_progress(&self, id: &EventId, amount: f64) -> AppResult<Event> {
        self.edit_event(id, |event| {
            event.current_value += amount;
            Ok(())
        })
        .await
    }

    pub async fn delete_event(&self, id: &EventId) -> AppResult<()> {
        let _guard = self.writer.lock().await;
        self.hydrate_locked().await?;
        self.delete_locked(&self.resolve_id(id)).await
    }

    /// Upload local-only events and retry pending updates.
    pub async fn reconcile(&self) -> ReconcileReport {
        let _guard = self.writer.lock().await;
        if let Err(e) = self.hydrate_locked().await {
            warn!("Skipping reconcile, event cache unreadable: {}", e);
            return ReconcileReport::default();
        }
        self.reconcile_locked().await
    }

    /// Reload, reconcile, then delete every past server-known event.
    pub async fn clear_past_events(&self) -> ClearReport {
        let _guard = self.writer.lock().await;
        self.load_locked().await;
        if !self.hydrated.load(Ordering::SeqCst) {
            warn!("Skipping clear of past events, event cache unreadable");
            return ClearReport::default();
        }
        self.reconcile_locked().await;
        self.clear_past_locked().await
    }

    /// Re-fetch one server-known event and its participants.
    pub async fn refresh_event(&self, id: &EventId) -> AppResult<Event> {
        let _guard = self.writer.lock().await;
        self.hydrate_locked().await?;
        self.refresh_locked(&self.resolve_id(id)).await
    }

    /// Re-run the classifier over the in-memory collection, e.g. after the
    /// device clock advanced while the app was in the background.
    pub async fn refresh_lifecycle(&self) {
        let _guard = self.writer.lock().await;
        let now = self.clock.now();
        self.events.send_if_modified(|events| {
            let mut changed = false;
            for event in events.iter_mut() {
                let state = classify(now, event.start, event.end);
                if state != event.lifecycle_state {
                    event.lifecycle_state = state;
                    changed = true;
                }
            }
            changed
        });
    }

    // ------------------------------------------------------------------------
    // Locked implementations
    // ------------------------------------------------------------------------

    async fn load_locked(&self) -> Vec<Event> {
        let hydrated = match self.hydrate_locked().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Event cache unreadable, it will not be written: {}", e);
                false
            }
        };
        let now = self.clock.now();

        match self.fetch_remote(now).await {
            Ok(remote) => {
                let merged = merge_remote(remote, self.snapshot(), now);
                info!("Loaded {} events from remote", merged.len());
                self.seed_local_ids(&merged);
                if hydrated {
                    self.commit(merged.clone()).await;
                } else {
                    self.events.send_replace(merged.clone());
                }
                merged
            }
            Err(e) => {
                warn!("Failed to load events from remote, using cache: {}", e);
                // Once hydrated, the in-memory collection holds the cache plus
                // every commit since; otherwise keep whatever is shown.
                let mut cached = self.snapshot();
                reclassify_all(&mut cached, now);
                self.events.send_replace(cached.clone());
                cached
            }
        }
    }

    async fn add_locked(&self, draft: EventDraft) -> AppResult<Event> {
        let now = self.clock.now();
        let valid = match validate_draft(draft) {
            Ok(valid) => valid,
            Err(e) => {
                self.alerts.alert(Alert::new(
                    AlertLevel::Warning,
                    "Event not saved",
                    e.to_string(),
                ));
                return Err(e);
            }
        };
        // Placeholder id; replaced by the server id or a fresh local id below.
        let mut event = valid.into_event(EventId::Local(0), now);

        match self.gateway.create_event(&EventPayload::from(&event)).await {
            Ok(created) => {
                event.id = EventId::Remote(created.id);
                event.current_value = 0.0;
                info!("Created event {} on remote", event.id);
            }
            Err(e) => {
                event.id = self.allocate_local_id(&self.snapshot());
                warn!(
                    "Failed to create event on remote, keeping it locally as {}: {}",
                    event.id, e
                );
                self.alerts.alert(Alert::new(
                    AlertLevel::Info,
                    "Saved offline",
                    format!(
                        "\"{}\" will be uploaded once the connection is back.",
                        event.title
                    ),
                ));
            }
        }

        let mut events = self.snapshot();
        events.push(event.clone());
        self.commit(events).await;
        Ok(event)
    }

    async fn update_locked(&self, mut event: Event) -> AppResult<Event> {
        event.id = self.resolve_id(&event.id);
        if !self.snapshot().iter().any(|e| e.id == event.id) {
            return Err(AppError::NotFound(format!("event {}", event.id)));
        }

        let now = self.clock.now();
        let mut updated = prepare_update(event, now);

        if updated.is_local_only() {
            let report = self.reconcile_locked().await;
            match report.remote_id_for(&updated.id) {
                Some(remote) => updated.id = remote.clone(),
                None => {
                    debug!("Event {} is still local-only; updating locally", updated.id);
                    let mut events = self.snapshot();
                    replace_event(&mut events, updated.clone());
                    self.commit(events).await;
                    return Ok(updated);
                }
            }
        }

        let remote_id = updated.id.to_string();
        let result = self
            .gateway
            .update_event(&remote_id, &EventPayload::from(&updated))
            .await;

        if let Err(ref e) = result {
            warn!("Failed to update event {} on remote: {}", remote_id, e);
            updated.pending_update = true;
            self.alerts.alert(Alert::new(
                AlertLevel::Warning,
                "Update not synced",
                format!(
                    "Your changes to \"{}\" are saved on this device and will be retried.",
                    updated.title
                ),
            ));
        }

        let mut events = self.snapshot();
        replace_event(&mut events, updated.clone());
        self.commit(events).await;

        result.map(|_| updated)
    }

    async fn delete_locked(&self, id: &EventId) -> AppResult<()> {
        let mut events = self.snapshot();
        let Some(pos) = events.iter().position(|e| &e.id == id) else {
            return Err(AppError::NotFound(format!("event {}", id)));
        };

        if let EventId::Remote(remote_id) = id {
            if let Err(e) = self.gateway.delete_event(remote_id).await {
                warn!("Failed to delete event {} on remote: {}", remote_id, e);
                self.alerts.alert(Alert::new(
                    AlertLevel::Error,
                    "Delete failed",
                    format!("\"{}\" could not be deleted. Please try again.", events[pos].title),
                ));
                return Err(e);
            }
        }

        let removed = events.remove(pos);
        info!("Deleted event {} ({})", removed.id, removed.title);
        self.commit(events).await;
        Ok(())
    }

    async fn reconcile_locked(&self) -> ReconcileReport {
        let mut events = self.snapshot();
        let mut report = ReconcileReport::default();

        for event in events.iter_mut() {
            if event.is_local_only() {
                match self.gateway.create_event(&EventPayload::from(&*event)).await {
                    Ok(created) => {
                        let remote = EventId::Remote(created.id);
                        let local = std::mem::replace(&mut event.id, remote.clone());
                        event.pending_update = false;
                        info!("Uploaded local event {} as {}", local, remote);
                        self.uploaded_ids().insert(local.clone(), remote.clone());
                        report.created.push(IdMapping { local, remote });
                    }
                    Err(e) => {
                        debug!("Local event {} still not uploaded: {}", event.id, e);
                        report.failures.push(SyncFailure {
                            id: event.id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            } else if event.pending_update {
                let remote_id = event.id.to_string();
                match self
                    .gateway
                    .update_event(&remote_id, &EventPayload::from(&*event))
                    .await
                {
                    Ok(()) => {
                        event.pending_update = false;
                        info!("Delivered pending update for event {}", remote_id);
                        report.updated.push(event.id.clone());
                    }
                    Err(e) => {
                        debug!("Pending update for event {} failed again: {}", remote_id, e);
                        report.failures.push(SyncFailure {
                            id: event.id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if !report.created.is_empty() || !report.updated.is_empty() {
            dedupe_by_id(&mut events);
            self.commit(events).await;
        }

        report
    }

    async fn clear_past_locked(&self) -> ClearReport {
        let mut events = self.snapshot();
        let targets: Vec<String> = events
            .iter()
            .filter(|e| e.lifecycle_state == LifecycleState::Past)
            .filter_map(|e| e.id.as_remote().map(str::to_string))
            .collect();

        let results = join_all(targets.iter().map(|id| self.gateway.delete_event(id))).await;

        let mut report = ClearReport::default();
        let mut deleted: HashSet<EventId> = HashSet::new();
        for (id, result) in targets.into_iter().zip(results) {
            let id = EventId::Remote(id);
            match result {
                Ok(()) => {
                    deleted.insert(id.clone());
                    report.deleted.push(id);
                }
                Err(e) => {
                    warn!("Failed to delete past event {}: {}", id, e);
                    report.failures.push(SyncFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !deleted.is_empty() {
            events.retain(|e| !deleted.contains(&e.id));
            self.commit(events).await;
        }

        if !report.failures.is_empty() {
            self.alerts.alert(Alert::new(
                AlertLevel::Warning,
                "Some events were not removed",
                format!(
                    "{} past event(s) could not be deleted and were kept.",
                    report.failures.len()
                ),
            ));
        }

        info!(
            "Cleared {} past events ({} failed)",
            report.deleted.len(),
            report.failures.len()
        );
        report
    }

    async fn refresh_locked(&self, id: &EventId) -> AppResult<Event> {
        let EventId::Remote(remote_id) = id else {
            return Err(AppError::NotFound(format!(
                "event {} has not been uploaded yet",
                id
            )));
        };

        let mut events = self.snapshot();
        let remote = match self.gateway.get_event(remote_id).await {
            Ok(r) => r,
            Err(AppError::NotFound(msg)) => {
                // The remote no longer knows this event: drop our copy too.
                if let Some(pos) = events.iter().position(|e| &e.id == id) {
                    events.remove(pos);
                    info!("Event {} no longer exists upstream; removed locally", id);
                    self.commit(events).await;
                }
                return Err(AppError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        let participants = self.fetch_participants(remote_id).await;
        let fresh = materialize(remote, participants, now);

        let refreshed = match events.iter().find(|e| &e.id == id) {
            Some(local) if local.pending_update => {
                let mut kept = local.clone();
                kept.participants = fresh.participants;
                kept.lifecycle_state = classify(now, kept.start, kept.end);
                kept
            }
            _ => fresh,
        };

        replace_event(&mut events, refreshed.clone());
        self.commit(events).await;
        Ok(refreshed)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn snapshot(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Seed the in-memory collection from the cache the first time any
    /// operation runs, so a write before the first load cannot clobber it.
    ///
    /// A storage error leaves the engine unhydrated: nothing is committed to
    /// the cache until a later read succeeds.
    async fn hydrate_locked(&self) -> AppResult<()> {
        if self.hydrated.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut cached) = self.read_cache().await? {
            reclassify_all(&mut cached, self.clock.now());
            self.seed_local_ids(&cached);
            debug!("Hydrated {} events from cache", cached.len());
            self.events.send_replace(cached);
        }
        self.hydrated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn uploaded_ids(&self) -> MutexGuard<'_, HashMap<EventId, EventId>> {
        match self.uploaded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Map a temporary id that has since been uploaded to its server id.
    fn resolve_id(&self, id: &EventId) -> EventId {
        if id.is_local() {
            if let Some(remote) = self.uploaded_ids().get(id) {
                return remote.clone();
            }
        }
        id.clone()
    }

    async fn fetch_remote(&self, now: DateTime<Utc>) -> AppResult<Vec<Event>> {
        let remote = self.gateway.list_events().await?;
        let rosters = join_all(remote.iter().map(|r| self.fetch_participants(&r.id))).await;

        Ok(remote
            .into_iter()
            .zip(rosters)
            .map(|(r, participants)| materialize(r, participants, now))
            .collect())
    }

    /// Participants of one event; a failure degrades to an empty roster.
    async fn fetch_participants(&self, event_id: &str) -> Vec<Participant> {
        match self.gateway.list_participants(event_id).await {
            Ok(list) => list.into_iter().map(Participant::from).collect(),
            Err(e) => {
                warn!(
                    "Failed to fetch participants for event {}; showing none: {}",
                    event_id, e
                );
                Vec::new()
            }
        }
    }

    /// Cached collection. A blob that does not decode counts as absent; a
    /// storage failure is an error.
    async fn read_cache(&self) -> AppResult<Option<Vec<Event>>> {
        let Some(blob) = self.cache.get(&self.cache_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Vec<Event>>(&blob) {
            Ok(events) => Ok(Some(events)),
            Err(e) => {
                warn!("Discarding unreadable event cache: {}", e);
                Ok(None)
            }
        }
    }

    /// Publish `events` and write them through to the cache. A failed cache
    /// write is logged; the in-memory collection still changes.
    async fn commit(&self, events: Vec<Event>) {
        match serde_json::to_string(&events) {
            Ok(blob) => {
                if let Err(e) = self.cache.set(&self.cache_key, &blob).await {
                    warn!("Failed to write event cache: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize events for cache: {}", e),
        }
        self.events.send_replace(events);
    }

    fn seed_local_ids(&self, events: &[Event]) {
        let max_local = events
            .iter()
            .filter_map(|e| match e.id {
                EventId::Local(n) => Some(n),
                EventId::Remote(_) => None,
            })
            .max();
        if let Some(max) = max_local {
            self.next_local_id
                .fetch_max(max.saturating_add(1), Ordering::SeqCst);
        }
    }

    /// Next counter value not already used by an event in `events`.
    fn allocate_local_id(&self, events: &[Event]) -> EventId {
        loop {
            let id = EventId::Local(self.next_local_id.fetch_add(1, Ordering::SeqCst));
            if !events.iter().any(|e| e.id == id) {
                return id;
            }
        }
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

struct ValidDraft {
    title: String,
    description: String,
    location: String,
    activity_kind: String,
    goal_value: f64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    kind: EventKind,
}

impl ValidDraft {
    fn into_event(self, id: EventId, now: DateTime<Utc>) -> Event {
        Event {
            id,
            title: self.title,
            description: self.description,
            location: self.location,
            activity_kind: self.activity_kind,
            goal_value: self.goal_value,
            current_value: 0.0,
            start: self.start,
            end: self.end,
            lifecycle_state: classify(now, self.start, self.end),
            kind: self.kind,
            participants: Vec::new(),
            pending_update: false,
        }
    }
}

fn validate_draft(draft: EventDraft) -> AppResult<ValidDraft> {
    let title = draft
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("title is required".to_string()))?;
    let raw_start = draft
        .start
        .ok_or_else(|| AppError::Validation("start date is required".to_string()))?;
    let raw_end = draft
        .end
        .ok_or_else(|| AppError::Validation("end date is required".to_string()))?;
    let event_type = draft
        .event_type
        .ok_or_else(|| AppError::Validation("event type is required".to_string()))?;

    let start = temporal::parse_instant(Some(raw_start.as_str()))
        .map_err(|e| AppError::Validation(format!("start date is invalid: {}", e)))?;
    let end = temporal::parse_instant(Some(raw_end.as_str()))
        .map_err(|e| AppError::Validation(format!("end date is invalid: {}", e)))?;
    if end < start {
        return Err(AppError::Validation(
            "end date must not be before start date".to_string(),
        ));
    }

    let kind = match event_type {
        EventType::Team => {
            let team_count = draft.team_count.unwrap_or(0);
            let members_per_team = draft.members_per_team.unwrap_or(0);
            if team_count == 0 || members_per_team == 0 {
                return Err(AppError::Validation(
                    "team events need at least one team and one member per team".to_string(),
                ));
            }
            EventKind::Team {
                team_count,
                members_per_team,
            }
        }
        EventType::Individual => EventKind::Individual {
            total_participants: draft.total_participants.unwrap_or(0),
        },
    };

    Ok(ValidDraft {
        title,
        description: draft.description,
        location: draft.location,
        activity_kind: draft.activity_kind,
        goal_value: draft.goal_value,
        start,
        end,
        kind,
    })
}

/// Build an `Event` from a remote record, normalizing dates and deriving the
/// lifecycle state.
fn materialize(remote: RemoteEvent, participants: Vec<Participant>, now: DateTime<Utc>) -> Event {
    let start = temporal::normalize(remote.start_date.as_deref());
    let end = temporal::normalize(remote.end_date.as_deref());
    let kind = remote.kind();
    let current_value = remote
        .current_value
        .unwrap_or_else(|| teams::aggregate_progress(&participants))
        .max(0.0);

    Event {
        id: EventId::Remote(remote.id),
        title: remote.title,
        description: remote.description.unwrap_or_default(),
        location: remote.location.unwrap_or_default(),
        activity_kind: remote.activity_type.unwrap_or_default(),
        goal_value: remote.goal_value.unwrap_or(0.0),
        current_value,
        start,
        end,
        lifecycle_state: classify(now, start, end),
        kind,
        participants,
        pending_update: false,
    }
}

/// Combine a fresh remote snapshot with what is known locally.
///
/// Remote events replace their local copies, except where a local edit is
/// still pending (the local fields win, the remote roster is taken). Local-only
/// events are kept after the remote ones.
fn merge_remote(remote: Vec<Event>, known: Vec<Event>, now: DateTime<Utc>) -> Vec<Event> {
    let mut pending: HashMap<EventId, Event> = HashMap::new();
    let mut local_only: Vec<Event> = Vec::new();
    for event in known {
        if event.is_local_only() {
            local_only.push(event);
        } else if event.pending_update {
            pending.insert(event.id.clone(), event);
        }
    }

    let mut merged: Vec<Event> = remote
        .into_iter()
        .map(|fresh| match pending.remove(&fresh.id) {
            Some(mut local) => {
                local.participants = fresh.participants;
                local
            }
            None => fresh,
        })
        .collect();
    merged.extend(local_only);
    dedupe_by_id(&mut merged);
    reclassify_all(&mut merged, now);
    merged
}

fn prepare_update(mut event: Event, now: DateTime<Utc>) -> Event {
    event.current_value = event.current_value.max(0.0);
    event.lifecycle_state = classify(now, event.start, event.end);
    event.pending_update = false;
    event
}

fn replace_event(events: &mut Vec<Event>, updated: Event) {
    match events.iter_mut().find(|e| e.id == updated.id) {
        Some(slot) => *slot = updated,
        None => events.push(updated),
    }
}

fn dedupe_by_id(events: &mut Vec<Event>) {
    let mut seen: HashSet<EventId> = HashSet::new();
    events.retain(|e| seen.insert(e.id.clone()));
}
