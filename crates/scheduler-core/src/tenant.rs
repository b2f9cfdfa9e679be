//! Tenant admission manager.
//!
//! Bounds the number of simultaneously active tenants; tenants over the cap
//! wait in strict FIFO order on a single-shot wait-handle (a `oneshot`
//! channel plays that role here. The releasing party `send`s exactly once
//! and the waiter's `await` resolves atomically into "now active").

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use crate::domain::UserId;
use crate::store::Store;

#[derive(Debug, Clone, serde::Serialize)]
pub struct TenantStatus {
    pub active_users: usize,
    pub max_active_users: usize,
    pub queued_users: usize,
    pub user_job_counts: HashMap<UserId, i64>,
}

struct TenantManagerInner {
    active: HashSet<UserId>,
    /// Running-job reference count per active tenant. Absence means "not active".
    counts: HashMap<UserId, i64>,
    queue: VecDeque<(UserId, oneshot::Sender<()>)>,
}

/// Admits at most `max_active_users` concurrent tenants (default 3).
#[derive(Clone)]
pub struct TenantManager {
    max_active_users: usize,
    inner: Arc<Mutex<TenantManagerInner>>,
    store: Store,
}

impl TenantManager {
    pub fn new(max_active_users: usize, store: Store) -> Self {
        Self {
            max_active_users,
            inner: Arc::new(Mutex::new(TenantManagerInner {
                active: HashSet::new(),
                counts: HashMap::new(),
                queue: VecDeque::new(),
            })),
            store,
        }
    }

    /// Admits `user_id`, suspending the caller if the tenant cap is already
    /// saturated. Returns once `user_id` is in `active`.
    pub async fn acquire_user_slot(&self, user_id: &str) {
        let waiter = {
            let mut inner = self.inner.lock().await;
            if inner.active.contains(user_id) {
                debug!(user_id, "tenant already active");
                return;
            }
            if inner.active.len() < self.max_active_users {
                inner.active.insert(user_id.to_string());
                inner.counts.insert(user_id.to_string(), 0);
                info!(
                    user_id,
                    active = inner.active.len(),
                    max = self.max_active_users,
                    "tenant activated"
                );
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.queue.push_back((user_id.to_string(), tx));
            info!(
                user_id,
                queued = inner.queue.len(),
                "tenant queued, cap saturated"
            );
            rx
        };
        // Suspend outside the mutex; the releasing party wakes us via `tx.send`.
        let _ = waiter.await;
        info!(user_id, "tenant woke from queue");
    }

    /// Marks the start of one more job for an already-active tenant. A no-op
    /// for a tenant that is not active (e.g. a race with a concurrent release;
    /// the driver holds its own long-lived acquisition separate from per-job counts).
    pub async fn register_job_start(&self, user_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(count) = inner.counts.get_mut(user_id) {
            *count += 1;
        }
    }

    /// Marks the end of one job for `user_id`. If the tenant's job count
    /// reaches zero and the `Store` confirms no `RUNNING` jobs remain for
    /// them, the tenant is released and the next queued tenant (if any) is
    /// admitted.
    pub async fn register_job_end(&self, user_id: &str) {
        let hit_zero = {
            let mut inner = self.inner.lock().await;
            match inner.counts.get_mut(user_id) {
                Some(count) => {
                    *count -= 1;
                    *count <= 0
                }
                None => return,
            }
        };
        if !hit_zero {
            return;
        }

        let running = self.store.list_running_jobs_for_user(user_id).await;
        if !running.is_empty() {
            return;
        }

        let mut inner = self.inner.lock().await;
        // Re-check under lock: register_job_start may have raced in between.
        if inner.counts.get(user_id).copied().unwrap_or(0) <= 0 {
            info!(user_id, "tenant quiescent, releasing slot");
            inner.active.remove(user_id);
            inner.counts.remove(user_id);
            self.wake_next(&mut inner);
        }
    }

    fn wake_next(&self, inner: &mut TenantManagerInner) {
        if let Some((next_user, tx)) = inner.queue.pop_front() {
            inner.active.insert(next_user.clone());
            inner.counts.insert(next_user.clone(), 0);
            // The waiter must observe itself in `active` before it resumes:
            // both inserts above happen before this `send`, under the same lock.
            let _ = tx.send(());
            info!(user_id = %next_user, "tenant admitted from queue");
        }
    }

    pub async fn status(&self) -> TenantStatus {
        let inner = self.inner.lock().await;
        TenantStatus {
            active_users: inner.active.len(),
            max_active_users: self.max_active_users,
            queued_users: inner.queue.len(),
            user_job_counts: inner.counts.clone(),
        }
    }
}
