//! Connection pooling for HTTP/1.1 and HTTP/2.
//!
//! HTTP/1.1 connections are checked out exclusively and returned once fully
//! idle; HTTP/2 sessions are shared and handed out while other streams are
//! still in flight. Each pooled connection carries a process-unique id: the
//! externally observable signal of whether reuse happened is that the id did
//! not change.
//!
//! Two separate idle knobs exist on purpose. The per-connection idle timeout
//! (agent options timeout) closes sockets that sat unused. The agent idle
//! timeout expires the agent *identity*: once lapsed, the next request gets a
//! fresh generation and pooled connections from the old generation are
//! discarded even if their own idle timers had not fired.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::transport::{H1Connection, H2Connection};
use crate::version::Protocol;

/// Identity tuple deciding connection-reuse eligibility.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub is_https: bool,
    pub protocol: Protocol,
    /// Fingerprint of the TLS options; differing TLS identities never share
    /// a socket.
    pub tls_id: u64,
}

impl PoolKey {
    /// The agent cache ignores the protocol: one agent identity covers both
    /// transports to a target.
    fn agent_key(&self) -> AgentKey {
        AgentKey {
            host: self.host.clone(),
            port: self.port,
            is_https: self.is_https,
            tls_id: self.tls_id,
        }
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct AgentKey {
    host: String,
    port: u16,
    is_https: bool,
    tls_id: u64,
}

#[derive(Debug)]
struct IdleH1 {
    conn: H1Connection,
    id: u64,
    generation: u64,
    idle_since: Instant,
    idle_timeout: Duration,
}

impl IdleH1 {
    fn is_expired(&self) -> bool {
        self.idle_since.elapsed() >= self.idle_timeout
    }
}

#[derive(Debug)]
struct H2Entry {
    conn: H2Connection,
    id: u64,
    generation: u64,
    last_used: Instant,
    idle_timeout: Duration,
}

impl H2Entry {
    fn is_expired(&self) -> bool {
        self.last_used.elapsed() >= self.idle_timeout
    }
}

#[derive(Debug)]
struct AgentEntry {
    generation: u64,
    last_used: Instant,
}

#[derive(Debug, Default)]
struct PoolMaps {
    h1: HashMap<PoolKey, Vec<IdleH1>>,
    h2: HashMap<PoolKey, H2Entry>,
    agents: HashMap<AgentKey, AgentEntry>,
}

#[derive(Debug)]
struct PoolInner {
    maps: Mutex<PoolMaps>,
    next_id: AtomicU64,
    default_idle: Duration,
}

/// A connection pool. Cloning shares the pool; distinct pools never share
/// connections, which is what test isolation relies on.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// Pool statistics for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub h1_idle: usize,
    pub h2_sessions: usize,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Default idle-close for pooled connections when the request does not
    /// override it.
    pub const DEFAULT_IDLE: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self::with_idle_timeout(Self::DEFAULT_IDLE)
    }

    pub fn with_idle_timeout(default_idle: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                maps: Mutex::new(PoolMaps::default()),
                next_id: AtomicU64::new(1),
                default_idle,
            }),
        }
    }

    /// The process-wide default pool, created lazily and shared by every
    /// request that does not supply its own.
    pub fn global() -> Pool {
        static GLOBAL: OnceLock<Pool> = OnceLock::new();
        GLOBAL.get_or_init(Pool::new).clone()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolMaps> {
        self.inner.maps.lock().expect("pool mutex poisoned")
    }

    /// Resolve the agent generation for a request. When `agent_idle` has
    /// lapsed since the agent was last used, the generation bumps and
    /// connections from the old generation are dropped.
    pub(crate) fn agent_generation(&self, key: &PoolKey, agent_idle: Option<Duration>) -> u64 {
        let agent_key = key.agent_key();
        let mut maps = self.lock();
        let now = Instant::now();
        let entry = maps
            .agents
            .entry(agent_key.clone())
            .or_insert(AgentEntry {
                generation: 0,
                last_used: now,
            });
        if let Some(idle) = agent_idle {
            if now.duration_since(entry.last_used) >= idle {
                entry.generation += 1;
                tracing::debug!(
                    "agent for {}:{} expired, new generation {}",
                    agent_key.host,
                    agent_key.port,
                    entry.generation
                );
            }
        }
        entry.last_used = now;
        let generation = entry.generation;

        // Purge pooled connections from older generations of this agent.
        for (pool_key, idle) in maps.h1.iter_mut() {
            if pool_key.agent_key() == agent_key {
                idle.retain(|e| e.generation == generation);
            }
        }
        maps.h2.retain(|pool_key, entry| {
            if pool_key.agent_key() == agent_key && entry.generation != generation {
                entry.conn.close();
                false
            } else {
                true
            }
        });
        generation
    }

    /// Take an idle HTTP/1.1 connection, discarding expired or dead ones
    /// along the way.
    pub(crate) fn checkout_h1(
        &self,
        key: &PoolKey,
        generation: u64,
    ) -> Option<(H1Connection, u64)> {
        let mut maps = self.lock();
        let entries = maps.h1.get_mut(key)?;
        while let Some(entry) = entries.pop() {
            if entry.generation != generation {
                entry.conn.close();
                continue;
            }
            if entry.is_expired() {
                tracing::debug!(
                    "h1 pool: connection {} for {:?} expired after {:?} idle",
                    entry.id,
                    key,
                    entry.idle_since.elapsed()
                );
                entry.conn.close();
                continue;
            }
            if entry.conn.is_closed() {
                continue;
            }
            tracing::debug!("h1 pool: reusing connection {} for {:?}", entry.id, key);
            return Some((entry.conn, entry.id));
        }
        None
    }

    /// Return a fully idle HTTP/1.1 connection; its idle timer starts now.
    pub(crate) fn checkin_h1(
        &self,
        key: PoolKey,
        conn: H1Connection,
        id: u64,
        generation: u64,
        idle_timeout: Option<Duration>,
    ) {
        if conn.is_closed() {
            return;
        }
        let idle_timeout = idle_timeout.unwrap_or(self.inner.default_idle);
        let mut maps = self.lock();
        tracing::debug!("h1 pool: returning connection {} for {:?}", id, key);
        maps.h1.entry(key).or_default().push(IdleH1 {
            conn,
            id,
            generation,
            idle_since: Instant::now(),
            idle_timeout,
        });
    }

    /// Fetch the shared HTTP/2 session for a key. Unlike HTTP/1.1 the session
    /// is handed out even while other streams are active.
    pub(crate) fn lookup_h2(&self, key: &PoolKey, generation: u64) -> Option<(H2Connection, u64)> {
        let mut maps = self.lock();
        let stale = match maps.h2.get(key) {
            Some(entry) => {
                entry.generation != generation || entry.is_expired() || entry.conn.is_closed()
            }
            None => return None,
        };
        if stale {
            if let Some(entry) = maps.h2.remove(key) {
                entry.conn.close();
            }
            return None;
        }
        let entry = maps.h2.get_mut(key)?;
        entry.last_used = Instant::now();
        tracing::debug!("h2 pool: reusing session {} for {:?}", entry.id, key);
        Some((entry.conn.clone(), entry.id))
    }

    /// Register a fresh HTTP/2 session, replacing any stale entry.
    pub(crate) fn register_h2(
        &self,
        key: PoolKey,
        conn: H2Connection,
        id: u64,
        generation: u64,
        idle_timeout: Option<Duration>,
    ) {
        let idle_timeout = idle_timeout.unwrap_or(self.inner.default_idle);
        let mut maps = self.lock();
        if let Some(old) = maps.h2.insert(
            key,
            H2Entry {
                conn,
                id,
                generation,
                last_used: Instant::now(),
                idle_timeout,
            },
        ) {
            old.conn.close();
        }
    }

    /// Touch the HTTP/2 session's idle timer after a stream completes.
    pub(crate) fn touch_h2(&self, key: &PoolKey, id: u64) {
        let mut maps = self.lock();
        if let Some(entry) = maps.h2.get_mut(key) {
            if entry.id == id {
                entry.last_used = Instant::now();
            }
        }
    }

    /// Drop an HTTP/2 session after a protocol-level failure.
    pub(crate) fn remove_h2(&self, key: &PoolKey, id: u64) {
        let mut maps = self.lock();
        if maps.h2.get(key).is_some_and(|e| e.id == id) {
            if let Some(entry) = maps.h2.remove(key) {
                entry.conn.close();
            }
        }
    }

    /// Remove expired and dead connections.
    pub fn evict_idle(&self) {
        let mut maps = self.lock();
        for entries in maps.h1.values_mut() {
            entries.retain(|e| {
                let keep = !e.is_expired() && !e.conn.is_closed();
                if !keep {
                    tracing::debug!("h1 pool: evicting idle connection {}", e.id);
                }
                keep
            });
        }
        maps.h1.retain(|_, entries| !entries.is_empty());
        maps.h2.retain(|_, entry| {
            let keep = !entry.is_expired() && !entry.conn.is_closed();
            if !keep {
                tracing::debug!("h2 pool: evicting idle session {}", entry.id);
                entry.conn.close();
            }
            keep
        });
    }

    /// Periodic background eviction, the granularity of the idle timers.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.evict_idle();
            }
        })
    }

    pub fn stats(&self) -> PoolStats {
        let maps = self.lock();
        PoolStats {
            h1_idle: maps.h1.values().map(Vec::len).sum(),
            h2_sessions: maps.h2.len(),
        }
    }
}
