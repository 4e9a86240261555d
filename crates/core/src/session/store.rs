use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::domain::session::{Session, SessionId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session `{0}` was not found or has expired")]
    NotFound(SessionId),
    #[error("session `{session_id}` is at version {actual}, caller expected {expected}")]
    Conflict { session_id: SessionId, expected: u64, actual: u64 },
    #[error("session store is unavailable: {0}")]
    Unavailable(String),
}

/// Result of a `mutate` closure: a session to commit (or none) plus a value
/// handed back to the caller either way.
#[derive(Debug)]
pub struct Mutation<T> {
    commit: Option<Session>,
    value: T,
}

impl<T> Mutation<T> {
    pub fn commit(session: Session, value: T) -> Self {
        Self { commit: Some(session), value }
    }

    pub fn discard(value: T) -> Self {
        Self { commit: None, value }
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

/// In-process session container. Each id owns a slot guarded by its own
/// async mutex, so mutations of one session serialize while distinct
/// sessions proceed in parallel.
pub struct SessionStore {
    slots: RwLock<HashMap<SessionId, Slot>>,
    ttl: Duration,
    closed: AtomicBool,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { slots: RwLock::new(HashMap::new()), ttl, closed: AtomicBool::new(false) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live session for `session_id`, or a brand-new one with a
    /// freshly generated id. A caller-supplied id is never adopted.
    pub async fn get_or_create(
        &self,
        session_id: Option<&SessionId>,
        call_id: Option<&str>,
    ) -> Result<Session, SessionStoreError> {
        self.ensure_open()?;

        if let Some(session_id) = session_id {
            match self.get(session_id).await {
                Ok(session) => return Ok(session),
                Err(SessionStoreError::NotFound(_)) => {
                    debug!(
                        event_name = "session.replaced_unknown",
                        session_id = %session_id,
                        "unknown or expired session id, creating a new session"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        let mut slots = self.slots.write().await;
        let mut id = SessionId::generate();
        while slots.contains_key(&id) {
            id = SessionId::generate();
        }
        let session = Session::new(id.clone(), call_id.map(str::to_owned), Utc::now(), self.ttl);
        slots.insert(id, Arc::new(Mutex::new(Some(session.clone()))));
        debug!(event_name = "session.created", session_id = %session.session_id, "session created");

        Ok(session)
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<Session, SessionStoreError> {
        self.ensure_open()?;
        let slot = self.slot(session_id).await?;
        let mut guard = slot.lock().await;

        let live = guard.as_ref().filter(|session| !session.is_expired(Utc::now())).cloned();
        if let Some(session) = live {
            return Ok(session);
        }

        *guard = None;
        drop(guard);
        self.forget(session_id, &slot).await;
        Err(SessionStoreError::NotFound(session_id.clone()))
    }

    /// Runs `apply` over a snapshot of the session while holding its lock.
    ///
    /// A committed session gets `version + 1` and a refreshed expiry; the
    /// identity and creation time of the stored session always win. An error
    /// from `apply` leaves the stored session untouched. Returns the session
    /// as stored after the call together with the closure's value.
    pub async fn mutate<T, E, F, Fut>(
        &self,
        session_id: &SessionId,
        expected_version: Option<u64>,
        apply: F,
    ) -> Result<(Session, T), E>
    where
        E: From<SessionStoreError>,
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<Mutation<T>, E>>,
    {
        self.ensure_open()?;
        let slot = self.slot(session_id).await?;
        let mut guard = slot.lock().await;

        let live = guard.as_ref().filter(|session| !session.is_expired(Utc::now())).cloned();
        let Some(current) = live else {
            *guard = None;
            drop(guard);
            self.forget(session_id, &slot).await;
            return Err(SessionStoreError::NotFound(session_id.clone()).into());
        };

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(SessionStoreError::Conflict {
                    session_id: session_id.clone(),
                    expected,
                    actual: current.version,
                }
                .into());
            }
        }

        let Mutation { commit, value } = apply(current.clone()).await?;
        let Some(mut next) = commit else {
            return Ok((current, value));
        };

        let now = Utc::now();
        next.session_id = current.session_id;
        next.created_at = current.created_at;
        next.version = current.version + 1;
        next.updated_at = now;
        next.expires_at = now + self.ttl;
        *guard = Some(next.clone());

        Ok((next, value))
    }

    pub async fn expire(&self, session_id: &SessionId) -> Result<(), SessionStoreError> {
        self.ensure_open()?;
        let removed = self.slots.write().await.remove(session_id);
        if let Some(slot) = removed {
            *slot.lock().await = None;
        }
        Ok(())
    }

    /// Evicts every expired session that is not currently being mutated.
    pub async fn sweep_expired(&self) -> Result<usize, SessionStoreError> {
        self.ensure_open()?;
        let snapshot: Vec<(SessionId, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let now = Utc::now();
        let mut evicted = 0;
        for (session_id, slot) in snapshot {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.as_ref().map_or(true, |session| session.is_expired(now)) {
                *guard = None;
                drop(guard);
                self.forget(&session_id, &slot).await;
                evicted += 1;
            }
        }

        Ok(evicted)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Rejects every later operation. Mutations already holding a slot lock
    /// run to completion.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(event_name = "session.store_closed", "session store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), SessionStoreError> {
        if self.is_closed() {
            return Err(SessionStoreError::Unavailable("session store is shut down".to_owned()));
        }
        Ok(())
    }

    async fn slot(&self, session_id: &SessionId) -> Result<Slot, SessionStoreError> {
        self.slots
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionStoreError::NotFound(session_id.clone()))
    }

    async fn forget(&self, session_id: &SessionId, slot: &Slot) {
        let mut slots = self.slots.write().await;
        if slots.get(session_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(session_id);
        }
    }
}

/// Periodically evicts expired sessions until the store is closed.
pub fn spawn_sweeper(store: Arc<SessionStore>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.sweep_expired().await {
                Ok(0) => {}
                Ok(evicted) => {
                    let remaining = store.len().await;
                    debug!(
                        event_name = "session.swept",
                        evicted,
                        remaining,
                        "evicted expired sessions"
                    );
                }
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use crate::domain::session::SessionId;
    use crate::flows::BookingState;
    use crate::session::store::{spawn_sweeper, Mutation, SessionStore, SessionStoreError};

    fn store() -> SessionStore {
        SessionStore::new(Duration::minutes(30))
    }

    #[tokio::test]
    async fn unknown_ids_get_a_fresh_generated_session() -> Result<(), SessionStoreError> {
        let store = store();
        let supplied = SessionId("BK-made-up-by-caller".to_owned());

        let session = store.get_or_create(Some(&supplied), Some("call-1")).await?;

        assert_ne!(session.session_id, supplied);
        assert!(session.session_id.as_str().starts_with("BK-"));
        assert_eq!(session.call_id.as_deref(), Some("call-1"));
        assert_eq!(session.state, BookingState::Initial);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn existing_ids_are_reused() -> Result<(), SessionStoreError> {
        let store = store();
        let created = store.get_or_create(None, None).await?;
        let again = store.get_or_create(Some(&created.session_id), None).await?;

        assert_eq!(again.session_id, created.session_id);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn committed_mutations_bump_version() -> Result<(), SessionStoreError> {
        let store = store();
        let created = store.get_or_create(None, None).await?;

        let (session, value) = store
            .mutate(&created.session_id, Some(0), |mut session| async move {
                session.state = BookingState::Searched;
                Ok::<_, SessionStoreError>(Mutation::commit(session, "applied"))
            })
            .await?;

        assert_eq!(value, "applied");
        assert_eq!(session.version, 1);
        assert_eq!(store.get(&created.session_id).await?.state, BookingState::Searched);
        Ok(())
    }

    #[tokio::test]
    async fn discarded_and_failed_mutations_leave_the_session_untouched(
    ) -> Result<(), SessionStoreError> {
        let store = store();
        let created = store.get_or_create(None, None).await?;

        let (session, ()) = store
            .mutate(&created.session_id, None, |_snapshot| async move {
                Ok::<_, SessionStoreError>(Mutation::discard(()))
            })
            .await?;
        assert_eq!(session.version, 0);

        let failed: Result<(_, ()), SessionStoreError> = store
            .mutate(&created.session_id, None, |_| async move {
                Err(SessionStoreError::Unavailable("adapter exploded".to_owned()))
            })
            .await;
        assert!(failed.is_err());

        let stored = store.get(&created.session_id).await?;
        assert_eq!(stored.version, 0);
        assert_eq!(stored.state, BookingState::Initial);
        Ok(())
    }

    #[tokio::test]
    async fn stale_versions_are_rejected() -> Result<(), SessionStoreError> {
        let store = store();
        let created = store.get_or_create(None, None).await?;
        store
            .mutate(&created.session_id, None, |session| async move {
                Ok::<_, SessionStoreError>(Mutation::commit(session, ()))
            })
            .await?;

        let stale: Result<(_, ()), SessionStoreError> = store
            .mutate(&created.session_id, Some(0), |session| async move {
                Ok(Mutation::commit(session, ()))
            })
            .await;

        assert_eq!(
            stale.map(|_| ()),
            Err(SessionStoreError::Conflict {
                session_id: created.session_id.clone(),
                expected: 0,
                actual: 1,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_mutations_of_one_session_serialize() -> Result<(), SessionStoreError> {
        let store = Arc::new(store());
        let created = store.get_or_create(None, None).await?;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let id = created.session_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .mutate(&id, None, |session| async move {
                        tokio::time::sleep(StdDuration::from_millis(2)).await;
                        Ok::<_, SessionStoreError>(Mutation::commit(session, ()))
                    })
                    .await
                    .map(|(session, ())| session.version)
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            if let Ok(result) = handle.await {
                versions.push(result?);
            }
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=10).collect::<Vec<u64>>());
        assert_eq!(store.get(&created.session_id).await?.version, 10);
        Ok(())
    }

    #[tokio::test]
    async fn expired_sessions_read_as_not_found() -> Result<(), SessionStoreError> {
        let store = SessionStore::new(Duration::milliseconds(20));
        let created = store.get_or_create(None, None).await?;

        tokio::time::sleep(StdDuration::from_millis(40)).await;

        assert_eq!(
            store.get(&created.session_id).await,
            Err(SessionStoreError::NotFound(created.session_id.clone()))
        );
        assert_eq!(store.len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_and_expire_remove_sessions() -> Result<(), SessionStoreError> {
        let store = SessionStore::new(Duration::milliseconds(20));
        store.get_or_create(None, None).await?;
        store.get_or_create(None, None).await?;

        tokio::time::sleep(StdDuration::from_millis(40)).await;
        assert_eq!(store.sweep_expired().await?, 2);
        assert!(store.is_empty().await);

        let fresh = SessionStore::new(Duration::minutes(5));
        let session = fresh.get_or_create(None, None).await?;
        fresh.expire(&session.session_id).await?;
        assert!(matches!(
            fresh.get(&session.session_id).await,
            Err(SessionStoreError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_sweeper_evicts_and_stops_on_close() -> Result<(), SessionStoreError> {
        let store = Arc::new(SessionStore::new(Duration::milliseconds(10)));
        store.get_or_create(None, None).await?;
        let handle = spawn_sweeper(Arc::clone(&store), StdDuration::from_millis(15));

        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert_eq!(store.len().await, 0);

        store.close();
        let stopped = tokio::time::timeout(StdDuration::from_secs(1), handle).await;
        assert!(stopped.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let store = store();
        store.close();

        assert!(matches!(
            store.get_or_create(None, None).await,
            Err(SessionStoreError::Unavailable(_))
        ));
        assert!(matches!(store.sweep_expired().await, Err(SessionStoreError::Unavailable(_))));
    }
}
