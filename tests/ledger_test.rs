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

//! Ledger public API integration tests.

use chrono::{Duration, TimeZone, Utc};
use point_ledger_rs::{
    Clock, LedgerConfig, ManualClock, PointError, PointItemId, PointLedger, PointStatus, PointType,
    PolicyUpdate, UserId,
};
use std::sync::Arc;

fn make_ledger() -> (PointLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    ));
    let ledger = PointLedger::with_clock(&LedgerConfig::default(), clock.clone()).unwrap();
    (ledger, clock)
}

fn set_expire_days(ledger: &PointLedger, days: u32) {
    ledger
        .update_policy(&PolicyUpdate {
            default_expire_days: Some(days),
            ..PolicyUpdate::default()
        })
        .unwrap();
}

/// Three 1,000 lots: manual expiring in 50 days, then ordinary lots expiring
/// in 10 and 100 days.
fn three_lots(ledger: &PointLedger, user: UserId) -> [PointItemId; 3] {
    set_expire_days(ledger, 50);
    let manual = ledger.earn(user, 1_000, true, "GRANT-1").unwrap();
    set_expire_days(ledger, 10);
    let short = ledger.earn(user, 1_000, false, "EARN-10").unwrap();
    set_expire_days(ledger, 100);
    let long = ledger.earn(user, 1_000, false, "EARN-100").unwrap();
    [manual, short, long]
}

fn remain(ledger: &PointLedger, id: PointItemId) -> i64 {
    ledger.item(id).unwrap().remain_amount()
}

#[test]
fn earn_use_and_partial_refund() {
    let (ledger, _) = make_ledger();
    let user = UserId(999);

    ledger.earn(user, 10_000, false, "ORD-TEST-001").unwrap();
    assert_eq!(ledger.balance(user).unwrap(), 10_000);

    ledger.use_points(user, 3_000, "ORD-TEST-001").unwrap();
    assert_eq!(ledger.balance(user).unwrap(), 7_000);

    ledger.cancel_use(user, "ORD-TEST-001", 1_000).unwrap();
    assert_eq!(ledger.balance(user).unwrap(), 8_000);
}

#[test]
fn use_consumes_manual_then_soonest_expiry() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let [manual, short, long] = three_lots(&ledger, user);

    ledger.use_points(user, 2_000, "ORD-1").unwrap();

    assert_eq!(remain(&ledger, manual), 0);
    assert_eq!(remain(&ledger, short), 0);
    assert_eq!(remain(&ledger, long), 1_000);
    assert_eq!(ledger.item(manual).unwrap().status(), PointStatus::Exhausted);
    assert_eq!(ledger.balance(user).unwrap(), 1_000);

    let usage = ledger.histories_for_ref(user, "ORD-1");
    assert_eq!(usage.len(), 1);
    let consumed: Vec<_> = usage[0].details().iter().map(|d| d.item_id).collect();
    assert_eq!(consumed, vec![manual, short]);
}

#[test]
fn partial_refund_walks_original_usage_in_order() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let [manual, short, long] = three_lots(&ledger, user);
    ledger.use_points(user, 2_000, "ORD-1").unwrap();

    ledger.cancel_use(user, "ORD-1", 1_500).unwrap();

    assert_eq!(remain(&ledger, manual), 1_000);
    assert_eq!(remain(&ledger, short), 500);
    assert_eq!(remain(&ledger, long), 1_000);
    assert_eq!(ledger.item(manual).unwrap().status(), PointStatus::Available);
    assert_eq!(ledger.balance(user).unwrap(), 2_500);
}

#[test]
fn successive_refunds_skip_already_returned_slices() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let [manual, short, _] = three_lots(&ledger, user);
    ledger.use_points(user, 2_000, "ORD-1").unwrap();

    ledger.cancel_use(user, "ORD-1", 700).unwrap();
    ledger.cancel_use(user, "ORD-1", 700).unwrap();

    assert_eq!(remain(&ledger, manual), 1_000);
    assert_eq!(remain(&ledger, short), 400);

    ledger.cancel_use(user, "ORD-1", 600).unwrap();
    assert_eq!(remain(&ledger, short), 1_000);
    assert_eq!(ledger.balance(user).unwrap(), 3_000);

    assert_eq!(
        ledger.cancel_use(user, "ORD-1", 1),
        Err(PointError::RefundExceeded)
    );
}

#[test]
fn refund_into_expired_lot_creates_restore_lot() {
    let (ledger, clock) = make_ledger();
    let user = UserId(1);
    let original = ledger.earn(user, 1_000, false, "EARN-1").unwrap();
    ledger.use_points(user, 1_000, "ORD-1").unwrap();
    clock.advance(Duration::days(400));

    ledger.cancel_use(user, "ORD-1", 1_000).unwrap();

    assert_eq!(remain(&ledger, original), 0);
    let lots = ledger.items(user);
    assert_eq!(lots.len(), 2);
    let restored = lots.iter().find(|lot| lot.id() != original).unwrap();
    assert_eq!(restored.remain_amount(), 1_000);
    assert!(restored.expire_at() > clock.now());
    assert!(!restored.is_manual());
    assert_eq!(ledger.balance(user).unwrap(), 1_000);

    let records = ledger.histories_for_ref(user, "ORD-1");
    let restore = records
        .iter()
        .find(|h| h.point_type() == PointType::Restore)
        .unwrap();
    assert_eq!(restore.amount(), 1_000);
    assert_eq!(restore.details()[0].restored_from_item_id, Some(original));
    assert!(records.iter().all(|h| h.point_type() != PointType::UseCancel));
}

#[test]
fn lot_expiring_exactly_now_counts_as_expired() {
    let (ledger, clock) = make_ledger();
    let user = UserId(1);
    set_expire_days(&ledger, 10);
    ledger.earn(user, 500, false, "EARN-1").unwrap();

    clock.advance(Duration::days(10));

    assert_eq!(
        ledger.use_points(user, 1, "ORD-1"),
        Err(PointError::InsufficientUsablePoints)
    );
}

#[test]
fn duplicate_requests_are_rejected() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    ledger.earn(user, 1_000, false, "REF-1").unwrap();

    assert_eq!(
        ledger.earn(user, 1_000, false, "REF-1"),
        Err(PointError::DuplicateRequest("REF-1".into()))
    );
    // Same reference under a different type is a different request.
    ledger.earn(user, 1_000, true, "REF-1").unwrap();

    ledger.use_points(user, 100, "ORD-1").unwrap();
    assert_eq!(
        ledger.use_points(user, 100, "ORD-1"),
        Err(PointError::DuplicateRequest("ORD-1".into()))
    );
    assert_eq!(ledger.balance(user).unwrap(), 1_900);
}

#[test]
fn earn_respects_policy_limits() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);

    assert_eq!(
        ledger.earn(user, 0, false, "E-0"),
        Err(PointError::EarnAmountOutOfRange { min: 1, max: 100_000 })
    );

    ledger
        .update_policy(&PolicyUpdate {
            max_earn_amount: Some(1_000),
            max_possession_limit: Some(1_500),
            ..PolicyUpdate::default()
        })
        .unwrap();

    ledger.earn(user, 1_000, false, "E-1").unwrap();
    assert_eq!(
        ledger.earn(user, 1_001, false, "E-2"),
        Err(PointError::EarnAmountOutOfRange { min: 1, max: 1_000 })
    );
    assert_eq!(
        ledger.earn(user, 600, false, "E-3"),
        Err(PointError::PossessionLimitExceeded { limit: 1_500 })
    );
    ledger.earn(user, 500, false, "E-4").unwrap();
    assert_eq!(ledger.balance(user).unwrap(), 1_500);
}

#[test]
fn refund_may_not_push_wallet_over_possession_limit() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    ledger.earn(user, 1_000, false, "E-1").unwrap();
    ledger.use_points(user, 500, "ORD-1").unwrap();
    ledger
        .update_policy(&PolicyUpdate {
            max_earn_amount: Some(600),
            max_possession_limit: Some(600),
            ..PolicyUpdate::default()
        })
        .unwrap();

    assert_eq!(
        ledger.cancel_use(user, "ORD-1", 500),
        Err(PointError::PossessionLimitExceeded { limit: 600 })
    );
    assert_eq!(ledger.balance(user).unwrap(), 500);
    assert_eq!(ledger.histories_for_ref(user, "ORD-1").len(), 1);
}

#[test]
fn use_rejects_overdraw_without_side_effects() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let lot = ledger.earn(user, 1_000, false, "E-1").unwrap();

    assert_eq!(
        ledger.use_points(user, 1_001, "ORD-1"),
        Err(PointError::InsufficientBalance)
    );
    assert_eq!(ledger.use_points(user, 0, "ORD-2"), Err(PointError::InvalidAmount));
    assert_eq!(remain(&ledger, lot), 1_000);
    assert!(ledger.histories_for_ref(user, "ORD-1").is_empty());

    // A rejected order id can be retried.
    ledger.use_points(user, 1_000, "ORD-1").unwrap();
}

#[test]
fn cancel_use_error_paths() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);

    assert_eq!(
        ledger.cancel_use(user, "ORD-1", 10),
        Err(PointError::WalletNotFound)
    );

    ledger.earn(user, 1_000, false, "E-1").unwrap();
    assert_eq!(
        ledger.cancel_use(user, "ORD-1", 10),
        Err(PointError::UsageNotFound("ORD-1".into()))
    );

    ledger.use_points(user, 300, "ORD-1").unwrap();
    assert_eq!(ledger.cancel_use(user, "ORD-1", 0), Err(PointError::InvalidAmount));
    assert_eq!(
        ledger.cancel_use(user, "ORD-1", 301),
        Err(PointError::RefundExceeded)
    );
    assert_eq!(ledger.cancel_use(user, "", 10), Err(PointError::MissingRefId));
}

#[test]
fn refund_request_beyond_i64_range_is_rejected() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    ledger.earn(user, 1_000, false, "E-1").unwrap();
    ledger.use_points(user, 500, "ORD-1").unwrap();
    ledger.cancel_use(user, "ORD-1", 1).unwrap();

    assert_eq!(
        ledger.cancel_use(user, "ORD-1", i64::MAX),
        Err(PointError::RefundExceeded)
    );
    assert_eq!(ledger.balance(user).unwrap(), 501);
}

#[test]
fn cancel_earn_revokes_untouched_lot() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let keep = ledger.earn(user, 1_000, false, "E-1").unwrap();
    let revoke = ledger.earn(user, 400, false, "E-2").unwrap();

    ledger.cancel_earn(user, revoke, false).unwrap();

    assert_eq!(ledger.item(revoke).unwrap().status(), PointStatus::Canceled);
    assert_eq!(ledger.item(revoke).unwrap().remain_amount(), 0);
    assert_eq!(ledger.item(keep).unwrap().status(), PointStatus::Available);
    assert_eq!(ledger.balance(user).unwrap(), 1_000);

    let records = ledger.histories_for_ref(user, &revoke.to_string());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].point_type(), PointType::EarnCancel);
    assert_eq!(records[0].amount(), 400);

    assert_eq!(
        ledger.cancel_earn(user, revoke, false),
        Err(PointError::ItemNotAvailable)
    );
}

#[test]
fn admin_revoke_records_its_own_type() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let grant = ledger.earn(user, 800, true, "GRANT-1").unwrap();

    ledger.cancel_earn(user, grant, true).unwrap();

    let records = ledger.histories_for_ref(user, &grant.to_string());
    assert_eq!(records[0].point_type(), PointType::AdminRevoke);
    assert_eq!(ledger.balance(user).unwrap(), 0);
}

#[test]
fn cancel_earn_refuses_used_lot() {
    let (ledger, _) = make_ledger();
    let user = UserId(1);
    let lot = ledger.earn(user, 1_000, false, "E-1").unwrap();
    ledger.use_points(user, 1, "ORD-1").unwrap();

    assert_eq!(
        ledger.cancel_earn(user, lot, false),
        Err(PointError::ItemAlreadyUsed)
    );
    assert_eq!(ledger.balance(user).unwrap(), 999);
}

#[test]
fn cancel_earn_checks_ownership() {
    let (ledger, _) = make_ledger();
    let owner = UserId(1);
    let other = UserId(2);
    let lot = ledger.earn(owner, 1_000, false, "E-1").unwrap();
    ledger.earn(other, 10, false, "E-1").unwrap();

    assert_eq!(
        ledger.cancel_earn(other, lot, false),
        Err(PointError::OwnershipMismatch)
    );
    assert_eq!(
        ledger.cancel_earn(owner, PointItemId(9_999), false),
        Err(PointError::ItemNotFound)
    );
    assert_eq!(
        ledger.cancel_earn(UserId(3), lot, false),
        Err(PointError::WalletNotFound)
    );
    assert_eq!(ledger.balance(owner).unwrap(), 1_000);
}

#[test]
fn refund_history_types_are_split_by_lot_state() {
    let (ledger, clock) = make_ledger();
    let user = UserId(1);
    set_expire_days(&ledger, 10);
    let short = ledger.earn(user, 500, false, "E-SHORT").unwrap();
    set_expire_days(&ledger, 365);
    let long = ledger.earn(user, 500, false, "E-LONG").unwrap();
    ledger.use_points(user, 1_000, "ORD-1").unwrap();

    clock.advance(Duration::days(20));
    ledger.cancel_use(user, "ORD-1", 1_000).unwrap();

    let records = ledger.histories_for_ref(user, "ORD-1");
    let types: Vec<_> = records.iter().map(|h| h.point_type()).collect();
    assert_eq!(
        types,
        vec![PointType::Use, PointType::UseCancel, PointType::Restore]
    );
    assert_eq!(remain(&ledger, short), 0);
    assert_eq!(remain(&ledger, long), 500);
    assert_eq!(ledger.balance(user).unwrap(), 1_000);
}
