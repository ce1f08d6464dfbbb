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

//! Expiration sweep.
//!
//! Scans for available lots whose expiry lies before a cutoff, expires them in
//! batches of at most `chunk_size` lots, writes one EXPIRE history per lot and
//! debits each affected wallet once per batch.
//!
//! Each user's part of a batch runs under the same per-user lock as the
//! orchestrator and re-checks the selection predicate, so a rerun or an
//! overlapping run never expires a lot twice.

use crate::PointLedger;
use crate::base::{PointItemId, UserId};
use crate::error::PointError;
use crate::history::{HistoryDraft, PointType};
use crate::store::BookAccess;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, instrument};

/// Outcome of one sweep run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub batches: usize,
    pub expired_items: usize,
    pub expired_amount: i64,
    pub affected_users: usize,
    /// Users whose batch was rolled back because the wallet could not absorb
    /// the debit.
    pub failed_users: Vec<UserId>,
}

impl SweepReport {
    fn new(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            batches: 0,
            expired_items: 0,
            expired_amount: 0,
            affected_users: 0,
            failed_users: Vec::new(),
        }
    }
}

impl PointLedger {
    /// Expires every available lot with `expire_at` before the cutoff.
    ///
    /// The cutoff is the start of `target` (UTC) when given, otherwise now.
    #[instrument(skip(self))]
    pub fn run_expiration(&self, target: Option<NaiveDate>) -> SweepReport {
        let now = self.clock.now();
        let cutoff = target
            .map(|date| date.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or(now);
        let ref_id = format!("BATCH_{}", now.date_naive());
        let chunk_size = self.sweep.chunk_size.max(1);

        info!(%cutoff, chunk_size, "expiration sweep started");

        let mut report = SweepReport::new(cutoff);
        let mut affected = BTreeSet::new();
        let mut batch: Vec<(UserId, PointItemId)> = Vec::with_capacity(chunk_size);

        for user_id in self.store.user_ids() {
            let candidates = self
                .store
                .read(user_id, |book| {
                    book.items()
                        .filter(|item| item.is_sweepable_before(cutoff))
                        .map(|item| item.id())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            for item_id in candidates {
                batch.push((user_id, item_id));
                if batch.len() >= chunk_size {
                    self.expire_batch(&mut batch, now, cutoff, &ref_id, &mut report, &mut affected);
                }
            }
        }
        if !batch.is_empty() {
            self.expire_batch(&mut batch, now, cutoff, &ref_id, &mut report, &mut affected);
        }

        report.affected_users = affected.len();
        info!(
            batches = report.batches,
            expired_items = report.expired_items,
            expired_amount = report.expired_amount,
            affected_users = report.affected_users,
            failed_users = report.failed_users.len(),
            "expiration sweep finished"
        );
        report
    }

    fn expire_batch(
        &self,
        batch: &mut Vec<(UserId, PointItemId)>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        ref_id: &str,
        report: &mut SweepReport,
        affected: &mut BTreeSet<UserId>,
    ) {
        let mut by_user: BTreeMap<UserId, Vec<PointItemId>> = BTreeMap::new();
        for (user_id, item_id) in batch.drain(..) {
            by_user.entry(user_id).or_default().push(item_id);
        }
        report.batches += 1;

        for (user_id, item_ids) in by_user {
            let outcome = self
                .store
                .transact(user_id, BookAccess::Existing, now, |uow| {
                    let mut expired_items: usize = 0;
                    let mut total: i64 = 0;
                    for item_id in item_ids {
                        let Some(item) = uow.item_mut(item_id) else {
                            continue;
                        };
                        if !item.is_sweepable_before(cutoff) {
                            continue;
                        }
                        let amount = item.expire();
                        if amount == 0 {
                            continue;
                        }

                        let mut history = HistoryDraft::new(user_id, PointType::Expire, ref_id);
                        history.add_detail(item_id, amount);
                        uow.record(history);
                        expired_items += 1;
                        total += amount;
                    }
                    if total > 0 {
                        uow.wallet()?.use_points(total)?;
                    }
                    Ok::<_, PointError>((expired_items, total))
                });

            match outcome {
                Ok((0, _)) => {}
                Ok((expired_items, total)) => {
                    debug!(user = %user_id, expired_items, total, "lots expired");
                    report.expired_items += expired_items;
                    report.expired_amount += total;
                    affected.insert(user_id);
                }
                Err(e) => {
                    error!(user = %user_id, code = e.code(), error = ?e, "expiration rolled back for user");
                    report.failed_users.push(user_id);
                }
            }
        }
    }
}
