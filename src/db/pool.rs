//! Generic connection pool with validation-on-acquire.
//!
//! The pool exclusively owns every [`DriverConn`]; callers hold a
//! [`PooledConn`] borrow that returns the connection on release or drop.
//! Connection state machine: `idle -> in_use` on acquire, `in_use -> idle`
//! on healthy release, `in_use -> broken -> removed` on driver error or
//! failed validation, `idle -> broken` when the background sweep fails a
//! ping. Brokenness is terminal; broken connections are discarded and lazily
//! replaced.
//!
//! Every acquire validates: the driver-native open flag always, plus a
//! single ping round-trip when the last validation is older than the
//! configured window. Failures are retried against fresh connections up to
//! `max_validation_retries` before surfacing `Unavailable`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::DbError;
use crate::events::{Event, EventBus, PRIORITY_DEFAULT};

use super::{CatalogEntry, Driver, DriverConn, Param, QueryOutput};

#[derive(Debug, Clone)]
struct PoolOptions {
    min: usize,
    max: usize,
    validation_window: Duration,
    max_validation_retries: u32,
}

struct IdleConn {
    id: Uuid,
    conn: Box<dyn DriverConn>,
    last_validated: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConn>,
    /// Connections alive in any state (idle + in_use).
    total: usize,
    in_use: usize,
    /// Discards awaiting a replacement open; used to attribute
    /// `reconnections` to validation failures rather than pool growth.
    pending_replacements: usize,
    closed: bool,
}

/// Running counters published as `pool.metrics` events.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub validations: AtomicU64,
    pub failures: AtomicU64,
    pub reconnections: AtomicU64,
}

/// Point-in-time metrics view.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    pub validations: u64,
    pub failures: u64,
    pub reconnections: u64,
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// Shared-handle pool; clones refer to the same pool.
#[derive(Clone)]
pub struct Pool {
    driver: Arc<dyn Driver>,
    opts: PoolOptions,
    state: Arc<Mutex<PoolState>>,
    /// Signalled when capacity frees up (release or discard).
    returned: Arc<Notify>,
    metrics: Arc<PoolMetrics>,
    bus: Option<Arc<EventBus>>,
}

impl Pool {
    pub fn new(
        driver: Arc<dyn Driver>,
        config: &DatabaseConfig,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            driver,
            opts: PoolOptions {
                min: config.pool_min,
                max: config.pool_max,
                validation_window: config.validation_window,
                max_validation_retries: config.max_validation_retries,
            },
            state: Arc::new(Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                in_use: 0,
                pending_replacements: 0,
                closed: false,
            })),
            returned: Arc::new(Notify::new()),
            metrics: Arc::new(PoolMetrics::default()),
            bus,
        }
    }

    /// Pre-open the configured minimum (at least one). At least one
    /// connection must come up for the pool to be considered ready.
    pub async fn warm_up(&self) -> Result<(), DbError> {
        let target = self.opts.min.max(1);
        let mut first_error = None;
        let mut opened = 0;
        for _ in 0..target {
            match self.open_validated().await {
                Ok(conn) => {
                    let mut st = self.lock_state();
                    st.total += 1;
                    st.idle.push_back(conn);
                    opened += 1;
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if opened == 0 {
            Err(first_error.unwrap_or(DbError::Unavailable { attempts: 0 }))
        } else {
            Ok(())
        }
    }

    /// Borrow a validated connection, waiting up to `timeout` for capacity.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConn, DbError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut validation_attempts: u32 = 0;

        loop {
            enum Action {
                Validate(IdleConn),
                Open,
                Wait,
            }

            let action = {
                let mut st = self.lock_state();
                if st.closed {
                    return Err(DbError::Broken("pool is closed".into()));
                }
                if let Some(idle) = st.idle.pop_front() {
                    st.in_use += 1;
                    Action::Validate(idle)
                } else if st.total < self.opts.max {
                    st.total += 1;
                    st.in_use += 1;
                    Action::Open
                } else {
                    Action::Wait
                }
            };

            match action {
                Action::Validate(mut idle) => {
                    self.metrics.validations.fetch_add(1, Ordering::Relaxed);
                    let healthy = if !idle.conn.is_open() {
                        false
                    } else if idle.last_validated.elapsed() > self.opts.validation_window {
                        idle.conn.ping().await.is_ok()
                    } else {
                        true
                    };

                    if healthy {
                        return Ok(self.handle(idle.id, idle.conn));
                    }

                    // in_use -> broken -> removed
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    {
                        let mut st = self.lock_state();
                        st.total -= 1;
                        st.in_use -= 1;
                        st.pending_replacements += 1;
                    }
                    self.returned.notify_waiters();
                    validation_attempts += 1;
                    if validation_attempts > self.opts.max_validation_retries {
                        return Err(DbError::Unavailable {
                            attempts: validation_attempts,
                        });
                    }
                }
                Action::Open => match self.open_validated().await {
                    Ok(idle) => {
                        {
                            let mut st = self.lock_state();
                            if st.pending_replacements > 0 {
                                st.pending_replacements -= 1;
                                self.metrics.reconnections.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        self.publish_metrics();
                        return Ok(self.handle(idle.id, idle.conn));
                    }
                    Err(e) => {
                        {
                            let mut st = self.lock_state();
                            st.total -= 1;
                            st.in_use -= 1;
                        }
                        self.returned.notify_waiters();
                        validation_attempts += 1;
                        if validation_attempts > self.opts.max_validation_retries {
                            return Err(e);
                        }
                    }
                },
                Action::Wait => {
                    let waited =
                        tokio::time::timeout_at(deadline, self.returned.notified()).await;
                    if waited.is_err() {
                        return Err(DbError::PoolExhausted {
                            size: self.opts.max,
                        });
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(DbError::AcquireTimeout(timeout));
            }
        }
    }

    /// Current metrics and occupancy.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let st = self.lock_state();
        PoolMetricsSnapshot {
            validations: self.metrics.validations.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            reconnections: self.metrics.reconnections.load(Ordering::Relaxed),
            total: st.total,
            idle: st.idle.len(),
            in_use: st.in_use,
        }
    }

    /// Background health sweep: pings idle connections, discards the broken
    /// (`idle -> broken`), tops the pool back up to its minimum, and
    /// publishes a metrics event each round.
    pub fn start_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if pool.lock_state().closed {
                    return;
                }
                pool.sweep_once().await;
            }
        })
    }

    async fn sweep_once(&self) {
        let drained: Vec<IdleConn> = {
            let mut st = self.lock_state();
            st.idle.drain(..).collect()
        };

        for mut idle in drained {
            let healthy = idle.conn.is_open() && idle.conn.ping().await.is_ok();
            let mut st = self.lock_state();
            if healthy {
                idle.last_validated = Instant::now();
                st.idle.push_back(idle);
            } else {
                st.total -= 1;
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(id = %idle.id, "sweep removed broken idle connection");
            }
        }

        // Top up to the minimum.
        loop {
            {
                let st = self.lock_state();
                if st.closed || st.total >= self.opts.min {
                    break;
                }
            }
            match self.open_validated().await {
                Ok(conn) => {
                    let mut st = self.lock_state();
                    st.total += 1;
                    st.idle.push_back(conn);
                    self.metrics.reconnections.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sweep failed to replace connection");
                    break;
                }
            }
        }
        self.publish_metrics();
    }

    /// Drain the pool: wait up to `timeout` for borrows to return, then
    /// force-close whatever is left. Returns whether the drain was clean.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        {
            let mut st = self.lock_state();
            st.closed = true;
        }
        loop {
            let in_use = self.lock_state().in_use;
            if in_use == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, self.returned.notified())
                .await
                .is_err()
            {
                break;
            }
        }
        let mut st = self.lock_state();
        st.idle.clear();
        let clean = st.in_use == 0;
        st.total = st.idle.len() + st.in_use;
        clean
    }

    async fn open_validated(&self) -> Result<IdleConn, DbError> {
        let mut conn = self.driver.open().await?;
        self.metrics.validations.fetch_add(1, Ordering::Relaxed);
        conn.ping().await?;
        Ok(IdleConn {
            id: Uuid::new_v4(),
            conn,
            last_validated: Instant::now(),
        })
    }

    fn handle(&self, id: Uuid, conn: Box<dyn DriverConn>) -> PooledConn {
        PooledConn {
            id,
            conn: Some(conn),
            validated_at: Instant::now(),
            pool: self.clone(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state poisoned")
    }

    fn publish_metrics(&self) {
        if let Some(bus) = &self.bus {
            let snapshot = self.metrics();
            let _ = bus.publish(Event::new(
                "pool.metrics",
                serde_json::to_value(&snapshot).unwrap_or_default(),
                PRIORITY_DEFAULT,
            ));
        }
    }

    fn give_back(&self, id: Uuid, conn: Box<dyn DriverConn>, validated_at: Instant) {
        let mut st = self.lock_state();
        st.in_use = st.in_use.saturating_sub(1);
        if st.closed || !conn.is_open() {
            // in_use -> broken -> removed (or pool draining)
            st.total = st.total.saturating_sub(1);
        } else {
            st.idle.push_back(IdleConn {
                id,
                conn,
                last_validated: validated_at,
            });
        }
        drop(st);
        self.returned.notify_waiters();
    }

    fn forget(&self, _id: Uuid) {
        let mut st = self.lock_state();
        st.in_use = st.in_use.saturating_sub(1);
        st.total = st.total.saturating_sub(1);
        drop(st);
        self.returned.notify_waiters();
    }
}

/// A borrowed connection. Returns to its pool on [`PooledConn::release`] or
/// drop; both are idempotent. Statements on one borrow are serialised by
/// `&mut` access.
pub struct PooledConn {
    id: Uuid,
    conn: Option<Box<dyn DriverConn>>,
    validated_at: Instant,
    pool: Pool,
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn").field("id", &self.id).finish()
    }
}

impl PooledConn {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Execute a parameterised statement on this borrow.
    pub async fn execute(
        &mut self,
        statement: &str,
        params: &[Param],
    ) -> Result<QueryOutput, DbError> {
        match self.conn.as_mut() {
            Some(conn) => conn.execute(statement, params).await,
            None => Err(DbError::Broken("connection already released".into())),
        }
    }

    /// Liveness probe on this borrow.
    pub async fn ping(&mut self) -> Result<(), DbError> {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => Err(DbError::Broken("connection already released".into())),
        }
    }

    /// Load catalog entries on this borrow.
    pub async fn catalog(&mut self) -> Result<Vec<CatalogEntry>, DbError> {
        match self.conn.as_mut() {
            Some(conn) => conn.catalog().await,
            None => Err(DbError::Broken("connection already released".into())),
        }
    }

    /// Return the connection to the pool if still healthy. Idempotent.
    pub fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(self.id, conn, self.validated_at);
        }
    }

    /// Mark this borrow broken: the connection is dropped, not returned.
    pub fn discard(&mut self) {
        if self.conn.take().is_some() {
            self.pool.forget(self.id);
        }
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.release();
    }
}
