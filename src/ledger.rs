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

//! Point transaction orchestrator.
//!
//! # Operations
//!
//! - **Earn**: Grants a new lot, creating the wallet if needed.
//! - **Cancel earn**: Revokes a lot that has not been touched.
//! - **Use**: Draws points from lots in priority order (manual grants first,
//!   then soonest expiry).
//! - **Cancel use**: Refunds part or all of a previous use. Lots still valid
//!   get their balance back; lots that expired meanwhile are replaced by a new
//!   lot (RESTORE).
//!
//! Every operation runs as one unit of work under the user's lock; a failure
//! leaves wallet, lots and history exactly as they were.

use crate::base::{PointItemId, UserId};
use crate::clock::{Clock, SystemClock};
use crate::config::{LedgerConfig, SweepConfig};
use crate::error::{PointError, Result};
use crate::history::{HistoryDraft, PointType};
use crate::item::PointStatus;
use crate::policy::{PointPolicy, PolicyManager, PolicyStore, PolicyUpdate};
use crate::store::{BookAccess, LedgerStore};
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The ledger engine.
///
/// # Invariants
///
/// - A wallet's balance equals the sum of `remain_amount` over the user's
///   available and exhausted lots after every committed operation.
/// - Every history amount equals the sum of its details.
/// - A `(user, ref_id)` pair is accepted at most once per earn/use type.
/// - Refunds for an order never exceed the amount originally used.
#[derive(Debug)]
pub struct PointLedger {
    pub(crate) store: LedgerStore,
    pub(crate) policy: PolicyManager,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sweep: SweepConfig,
}

impl PointLedger {
    /// Creates a ledger on the system clock.
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let policy = PolicyManager::load_or_init(PolicyStore::new(), &config.policy, clock.now())?;
        Ok(Self {
            store: LedgerStore::new(),
            policy,
            clock,
            sweep: config.sweep.clone(),
        })
    }

    pub fn policy(&self) -> &PolicyManager {
        &self.policy
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Stores a new policy version merged from `update` and makes it active.
    pub fn update_policy(&self, update: &PolicyUpdate) -> Result<Arc<PointPolicy>> {
        self.policy.update(update, self.clock.now())
    }

    /// Grants `amount` points as a new lot and returns its id.
    ///
    /// `is_manual` marks an administrator grant (ADMIN_GRANT), which is
    /// consumed before ordinary lots.
    ///
    /// # Errors
    ///
    /// - [`PointError::MissingRefId`] - `ref_id` is blank.
    /// - [`PointError::DuplicateRequest`] - `ref_id` was already earned.
    /// - [`PointError::EarnAmountOutOfRange`] - Outside the policy bounds.
    /// - [`PointError::PossessionLimitExceeded`] - Balance would pass the cap.
    #[instrument(skip(self), fields(user = %user_id))]
    pub fn earn(
        &self,
        user_id: UserId,
        amount: i64,
        is_manual: bool,
        ref_id: &str,
    ) -> Result<PointItemId> {
        require_ref_id(ref_id)?;
        let policy = self.policy.cache().snapshot();
        let now = self.clock.now();
        let point_type = if is_manual {
            PointType::AdminGrant
        } else {
            PointType::Earn
        };

        self.store
            .transact(user_id, BookAccess::CreateIfMissing, now, |uow| {
                uow.wallet_or_create();
                if uow.has_history(ref_id, point_type) {
                    return Err(PointError::DuplicateRequest(ref_id.to_string()));
                }
                if amount < policy.min_earn_amount() || amount > policy.max_earn_amount() {
                    return Err(PointError::EarnAmountOutOfRange {
                        min: policy.min_earn_amount(),
                        max: policy.max_earn_amount(),
                    });
                }

                uow.wallet_or_create()
                    .earn(amount, policy.max_possession_limit())?;

                let expire_at = now + Duration::days(i64::from(policy.default_expire_days()));
                let item_id = uow.create_item(amount, expire_at, is_manual)?;

                let mut history = HistoryDraft::new(user_id, point_type, ref_id);
                history.add_detail(item_id, amount);
                uow.record(history);
                Ok(item_id)
            })
            .inspect(|item_id| info!(%item_id, %point_type, "points earned"))
            .inspect_err(|e| warn!(code = e.code(), error = %e, "earn rejected"))
    }

    /// Revokes an untouched lot (EARN_CANCEL, or ADMIN_REVOKE when `is_manual`).
    ///
    /// # Errors
    ///
    /// - [`PointError::WalletNotFound`] - User has no wallet.
    /// - [`PointError::ItemNotFound`] - No such lot.
    /// - [`PointError::OwnershipMismatch`] - Lot belongs to another user.
    /// - [`PointError::ItemAlreadyUsed`] - Lot was partially or fully used.
    #[instrument(skip(self), fields(user = %user_id, item = %item_id))]
    pub fn cancel_earn(&self, user_id: UserId, item_id: PointItemId, is_manual: bool) -> Result<()> {
        let now = self.clock.now();
        let point_type = if is_manual {
            PointType::AdminRevoke
        } else {
            PointType::EarnCancel
        };

        self.store
            .transact(user_id, BookAccess::Existing, now, |uow| {
                uow.wallet()?;
                let owner = self
                    .store
                    .item_owner(item_id)
                    .ok_or(PointError::ItemNotFound)?;
                if owner != user_id {
                    return Err(PointError::OwnershipMismatch);
                }

                let item = uow.item_mut(item_id).ok_or_else(|| {
                    PointError::Internal(format!("lot {item_id} indexed but missing from book"))
                })?;
                item.cancel_earn()?;
                let amount = item.original_amount();

                uow.wallet()?.use_points(amount)?;

                let mut history = HistoryDraft::new(user_id, point_type, item_id.to_string());
                history.add_detail(item_id, amount);
                uow.record(history);
                Ok(())
            })
            .inspect(|_| info!(%point_type, "earn cancelled"))
            .inspect_err(|e| warn!(code = e.code(), error = %e, "cancel earn rejected"))
    }

    /// Spends `amount` points for order `ref_id`.
    ///
    /// Either the whole amount is drawn from unexpired lots or nothing
    /// changes.
    ///
    /// # Errors
    ///
    /// - [`PointError::WalletNotFound`] - User has no wallet.
    /// - [`PointError::DuplicateRequest`] - Order already used points.
    /// - [`PointError::InsufficientBalance`] - Wallet balance too low.
    /// - [`PointError::InsufficientUsablePoints`] - Balance includes lots
    ///   that have expired but not been swept yet.
    #[instrument(skip(self), fields(user = %user_id))]
    pub fn use_points(&self, user_id: UserId, amount: i64, ref_id: &str) -> Result<()> {
        require_ref_id(ref_id)?;
        let now = self.clock.now();

        self.store
            .transact(user_id, BookAccess::Existing, now, |uow| {
                uow.wallet()?;
                if uow.has_history(ref_id, PointType::Use) {
                    return Err(PointError::DuplicateRequest(ref_id.to_string()));
                }

                uow.wallet()?.use_points(amount)?;

                let mut history = HistoryDraft::new(user_id, PointType::Use, ref_id);
                let mut remaining = amount;
                for item_id in uow.usable_items() {
                    if remaining <= 0 {
                        break;
                    }
                    let item = uow.item_mut(item_id).ok_or_else(|| {
                        PointError::Internal(format!("usable lot {item_id} vanished"))
                    })?;
                    let take = item.remain_amount().min(remaining);
                    item.use_points(take, now)?;
                    history.add_detail(item_id, take);
                    remaining -= take;
                }

                if remaining > 0 {
                    return Err(PointError::InsufficientUsablePoints);
                }
                uow.record(history);
                Ok(())
            })
            .inspect(|_| info!(amount, ref_id, "points used"))
            .inspect_err(|e| warn!(code = e.code(), error = %e, "use rejected"))
    }

    /// Refunds `amount` of the points used by `order_id`.
    ///
    /// The original usage details are walked in order, skipping what earlier
    /// partial cancels already returned. Each slice goes back to its lot
    /// (USE_CANCEL) or, if that lot has expired, into a fresh lot (RESTORE).
    /// The wallet gets the full `amount` back either way.
    ///
    /// # Errors
    ///
    /// - [`PointError::WalletNotFound`] - User has no wallet.
    /// - [`PointError::UsageNotFound`] - No USE recorded for `order_id`.
    /// - [`PointError::RefundExceeded`] - Earlier refunds plus `amount`
    ///   exceed the original usage.
    #[instrument(skip(self), fields(user = %user_id))]
    pub fn cancel_use(&self, user_id: UserId, order_id: &str, amount: i64) -> Result<()> {
        require_ref_id(order_id)?;
        if amount <= 0 {
            return Err(PointError::InvalidAmount);
        }
        let policy = self.policy.cache().snapshot();
        let now = self.clock.now();

        self.store
            .transact(user_id, BookAccess::Existing, now, |uow| {
                uow.wallet()?;
                let original = uow
                    .find_history(order_id, PointType::Use)
                    .ok_or_else(|| PointError::UsageNotFound(order_id.to_string()))?;

                let already_refunded = uow.refunded_total(order_id);
                if already_refunded
                    .checked_add(amount)
                    .is_none_or(|total| total > original.amount())
                {
                    return Err(PointError::RefundExceeded);
                }

                let restore_expire_at =
                    now + Duration::days(i64::from(policy.default_expire_days()));
                let mut cancel = HistoryDraft::new(user_id, PointType::UseCancel, order_id);
                let mut restore = HistoryDraft::new(user_id, PointType::Restore, order_id);
                let mut skip = already_refunded;
                let mut remaining = amount;

                for detail in original.details() {
                    if remaining <= 0 {
                        break;
                    }
                    if skip >= detail.amount {
                        skip -= detail.amount;
                        continue;
                    }
                    let refund = (detail.amount - skip).min(remaining);
                    skip = 0;

                    let expired = uow
                        .item(detail.item_id)
                        .map(|item| item.is_expired_at(now) || item.status() == PointStatus::Expired)
                        .ok_or_else(|| {
                            PointError::Internal(format!("used lot {} missing", detail.item_id))
                        })?;

                    if expired {
                        let new_item = uow.create_item(refund, restore_expire_at, false)?;
                        restore.add_restore_detail(new_item, refund, detail.item_id);
                    } else {
                        uow.item_mut(detail.item_id)
                            .ok_or_else(|| {
                                PointError::Internal(format!("used lot {} missing", detail.item_id))
                            })?
                            .cancel(refund, now)?;
                        cancel.add_detail(detail.item_id, refund);
                    }
                    remaining -= refund;
                }

                if remaining > 0 {
                    return Err(PointError::Internal(format!(
                        "usage details for {order_id} cover {} less than requested",
                        remaining
                    )));
                }

                if !cancel.is_empty() {
                    uow.record(cancel);
                }
                if !restore.is_empty() {
                    uow.record(restore);
                }

                uow.wallet()?.earn(amount, policy.max_possession_limit())?;
                Ok(())
            })
            .inspect(|_| info!(amount, order_id, "use cancelled"))
            .inspect_err(|e| warn!(code = e.code(), error = %e, "cancel use rejected"))
    }
}

fn require_ref_id(ref_id: &str) -> Result<()> {
    if ref_id.trim().is_empty() {
        return Err(PointError::MissingRefId);
    }
    Ok(())
}
