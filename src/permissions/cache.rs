//! # Ability Cache
//!
//! Per-user cache of built abilities.
//!
//! Entries expire after a TTL and are dropped eagerly when the user's
//! memberships or role change. Group moves and deletions rewrite paths that
//! cached conditions refer to, so they bump a generation counter that
//! invalidates every entry at once.
//!
//! Invalidation is local to this process. Another node may keep serving a
//! revoked grant until its entry's TTL runs out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use super::ability::Ability;

#[derive(Debug, Clone)]
struct CachedAbility {
    ability: Arc<Ability>,
    built_at: Instant,
    generation: u64,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Slots {
    abilities: HashMap<Uuid, CachedAbility>,
    /// Bumped by `invalidate_user`; a build started under an older epoch
    /// must not be stored
    epochs: HashMap<Uuid, u64>,
}

impl Slots {
    fn epoch(&self, user_id: Uuid) -> u64 {
        self.epochs.get(&user_id).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct AbilityCache {
    ttl: Duration,
    slots: RwLock<Slots>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AbilityCache {
    /// A zero TTL disables caching
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(Slots::default()),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached ability for `user_id`, or the result of `build`
    pub fn get_or_try_build<E>(
        &self,
        user_id: Uuid,
        build: impl FnOnce() -> Result<Ability, E>,
    ) -> Result<Arc<Ability>, E> {
        if let Some(ability) = self.fresh(user_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(ability);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Read before building so an invalidation racing the build wins
        let generation = self.generation.load(Ordering::Acquire);
        let epoch = self.slots.read().map(|slots| slots.epoch(user_id)).unwrap_or(0);
        let ability = Arc::new(build()?);

        if self.is_enabled() {
            if let Ok(mut slots) = self.slots.write() {
                if slots.epoch(user_id) == epoch {
                    slots.abilities.insert(
                        user_id,
                        CachedAbility {
                            ability: ability.clone(),
                            built_at: Instant::now(),
                            generation,
                        },
                    );
                }
            }
        }

        Ok(ability)
    }

    fn fresh(&self, user_id: Uuid) -> Option<Arc<Ability>> {
        if !self.is_enabled() {
            return None;
        }
        let current = self.generation.load(Ordering::Acquire);
        let slots = self.slots.read().ok()?;
        slots
            .abilities
            .get(&user_id)
            .filter(|e| e.generation == current && e.built_at.elapsed() < self.ttl)
            .map(|e| e.ability.clone())
    }

    /// Last cached ability regardless of age or generation
    pub fn stale(&self, user_id: Uuid) -> Option<Arc<Ability>> {
        self.slots
            .read()
            .ok()?
            .abilities
            .get(&user_id)
            .map(|e| e.ability.clone())
    }

    pub fn invalidate_user(&self, user_id: Uuid) {
        if let Ok(mut slots) = self.slots.write() {
            *slots.epochs.entry(user_id).or_insert(0) += 1;
            slots.abilities.remove(&user_id);
        }
    }

    /// Invalidate every entry without discarding them as stale fallbacks
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop entries past their TTL or generation
    pub fn purge_expired(&self) -> usize {
        let current = self.generation.load(Ordering::Acquire);
        let ttl = self.ttl;
        match self.slots.write() {
            Ok(mut slots) => {
                let before = slots.abilities.len();
                slots
                    .abilities
                    .retain(|_, e| e.generation == current && e.built_at.elapsed() < ttl);
                before - slots.abilities.len()
            }
            Err(_) => 0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.slots.read().map(|s| s.abilities.len()).unwrap_or(0),
        }
    }
}
