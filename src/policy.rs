// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Versioned earning policy.
//!
//! Policies are never edited in place. An update merges the requested fields
//! into the active version, validates the result and appends it as a new
//! version; the in-process cache is then swapped to that version in one step.

use crate::PointError;
use crate::config::PolicyDefaults;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const MIN_EARN_AMOUNT: i64 = 1;
const MAX_SAFE_EARN_AMOUNT: i64 = 100_000;
const MIN_EXPIRE_DAYS: u32 = 1;
const MAX_EXPIRE_DAYS: u32 = 1825;

/// One immutable policy version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointPolicy {
    version: u64,
    min_earn_amount: i64,
    max_earn_amount: i64,
    max_possession_limit: i64,
    default_expire_days: u32,
    created_at: Option<DateTime<Utc>>,
}

impl PointPolicy {
    /// Builds an unsaved policy, checking every bound.
    pub fn new(
        max_earn_amount: i64,
        max_possession_limit: i64,
        default_expire_days: u32,
    ) -> Result<Self, PointError> {
        if !(MIN_EARN_AMOUNT..=MAX_SAFE_EARN_AMOUNT).contains(&max_earn_amount) {
            return Err(PointError::InvalidPolicy(format!(
                "max earn amount must be between {MIN_EARN_AMOUNT} and {MAX_SAFE_EARN_AMOUNT}"
            )));
        }
        if max_possession_limit < max_earn_amount {
            return Err(PointError::InvalidPolicy(
                "max possession limit cannot be below the max earn amount".into(),
            ));
        }
        if !(MIN_EXPIRE_DAYS..MAX_EXPIRE_DAYS).contains(&default_expire_days) {
            return Err(PointError::InvalidPolicy(format!(
                "expire days must be at least {MIN_EXPIRE_DAYS} and below {MAX_EXPIRE_DAYS}"
            )));
        }
        Ok(Self {
            version: 0,
            min_earn_amount: MIN_EARN_AMOUNT,
            max_earn_amount,
            max_possession_limit,
            default_expire_days,
            created_at: None,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn min_earn_amount(&self) -> i64 {
        self.min_earn_amount
    }

    pub fn max_earn_amount(&self) -> i64 {
        self.max_earn_amount
    }

    pub fn max_possession_limit(&self) -> i64 {
        self.max_possession_limit
    }

    pub fn default_expire_days(&self) -> u32 {
        self.default_expire_days
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

/// Partial policy change. Absent fields keep the active value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyUpdate {
    pub max_earn_amount: Option<i64>,
    pub max_possession_limit: Option<i64>,
    pub default_expire_days: Option<u32>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_earn_amount.is_none()
            && self.max_possession_limit.is_none()
            && self.default_expire_days.is_none()
    }

    fn merge(&self, current: &PointPolicy) -> Result<PointPolicy, PointError> {
        PointPolicy::new(
            self.max_earn_amount.unwrap_or(current.max_earn_amount),
            self.max_possession_limit
                .unwrap_or(current.max_possession_limit),
            self.default_expire_days
                .unwrap_or(current.default_expire_days),
        )
    }
}

/// Append-only log of policy versions.
#[derive(Debug, Default)]
pub struct PolicyStore {
    versions: RwLock<Vec<Arc<PointPolicy>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently appended version.
    pub fn latest(&self) -> Option<Arc<PointPolicy>> {
        self.versions.read().last().cloned()
    }

    /// Stamps `policy` with the next version number and stores it.
    pub fn append(&self, mut policy: PointPolicy, now: DateTime<Utc>) -> Arc<PointPolicy> {
        let mut versions = self.versions.write();
        policy.version = versions.len() as u64 + 1;
        policy.created_at = Some(now);
        let stored = Arc::new(policy);
        versions.push(Arc::clone(&stored));
        stored
    }

    pub fn versions(&self) -> Vec<Arc<PointPolicy>> {
        self.versions.read().clone()
    }
}

/// Process-wide view of the active policy.
///
/// Readers always see a whole version; a refresh replaces the pointer
/// atomically.
#[derive(Debug)]
pub struct PolicyCache {
    current: ArcSwap<PointPolicy>,
}

impl PolicyCache {
    fn new(initial: Arc<PointPolicy>) -> Self {
        Self {
            current: ArcSwap::new(initial),
        }
    }

    pub fn snapshot(&self) -> Arc<PointPolicy> {
        self.current.load_full()
    }

    pub fn min_earn(&self) -> i64 {
        self.current.load().min_earn_amount
    }

    pub fn max_earn(&self) -> i64 {
        self.current.load().max_earn_amount
    }

    pub fn max_possession(&self) -> i64 {
        self.current.load().max_possession_limit
    }

    pub fn default_expire_days(&self) -> u32 {
        self.current.load().default_expire_days
    }

    fn swap(&self, next: Arc<PointPolicy>) {
        self.current.store(next);
    }
}

/// Owns the policy log and its cache.
#[derive(Debug)]
pub struct PolicyManager {
    store: PolicyStore,
    cache: PolicyCache,
    /// Serializes merge-validate-append-refresh.
    update_lock: Mutex<()>,
}

impl PolicyManager {
    /// Loads the latest version from `store`, seeding it from `defaults` when empty.
    pub fn load_or_init(
        store: PolicyStore,
        defaults: &PolicyDefaults,
        now: DateTime<Utc>,
    ) -> Result<Self, PointError> {
        let active = match store.latest() {
            Some(policy) => policy,
            None => {
                info!("no point policy found, creating default policy");
                let seed = PointPolicy::new(
                    defaults.max_earn_amount,
                    defaults.max_possession_limit,
                    defaults.default_expire_days,
                )?;
                store.append(seed, now)
            }
        };
        info!(
            version = active.version,
            max_earn = active.max_earn_amount,
            max_possession = active.max_possession_limit,
            expire_days = active.default_expire_days,
            "point policy loaded"
        );
        Ok(Self {
            store,
            cache: PolicyCache::new(active),
            update_lock: Mutex::new(()),
        })
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Re-reads the latest version into the cache.
    pub fn refresh(&self) -> Result<Arc<PointPolicy>, PointError> {
        let latest = self.store.latest().ok_or(PointError::PolicyNotFound)?;
        self.cache.swap(Arc::clone(&latest));
        Ok(latest)
    }

    /// Applies a partial update as a new version and refreshes the cache.
    ///
    /// Nothing is stored and the cache is untouched if validation fails.
    pub fn update(
        &self,
        request: &PolicyUpdate,
        now: DateTime<Utc>,
    ) -> Result<Arc<PointPolicy>, PointError> {
        if request.is_empty() {
            return Err(PointError::EmptyPolicyUpdate);
        }
        let _guard = self.update_lock.lock();
        let current = self.store.latest().ok_or(PointError::PolicyNotFound)?;
        let merged = request.merge(&current)?;
        self.store.append(merged, now);
        let active = self.refresh()?;
        info!(
            version = active.version,
            max_earn = active.max_earn_amount,
            max_possession = active.max_possession_limit,
            expire_days = active.default_expire_days,
            "point policy updated"
        );
        Ok(active)
    }
}
