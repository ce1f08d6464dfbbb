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

//! # Point Ledger
//!
//! This library keeps a points wallet per user, backed by individually
//! tracked lots that expire. It handles earning, administrative grants,
//! spending, refunds of spending, revocation of unspent grants, and a batch
//! sweep that forfeits expired lots.
//!
//! ## Core Components
//!
//! - [`PointLedger`]: Orchestrates earn, use and their cancellations
//! - [`Wallet`]: Per-user cached balance with a possession ceiling
//! - [`PointItem`]: A single lot with its own expiry and remaining amount
//! - [`PointHistory`]: Immutable record of each operation, with per-lot detail
//! - [`PolicyManager`]: Versioned earn limits and default expiry
//! - [`SweepScheduler`]: Periodic expiration sweep on a background thread
//!
//! ## Example
//!
//! ```
//! use point_ledger_rs::{LedgerConfig, PointLedger, UserId};
//!
//! let ledger = PointLedger::new(&LedgerConfig::default()).unwrap();
//!
//! ledger.earn(UserId(1), 1_000, false, "signup-bonus").unwrap();
//! ledger.use_points(UserId(1), 300, "order-17").unwrap();
//! ledger.cancel_use(UserId(1), "order-17", 100).unwrap();
//!
//! assert_eq!(ledger.balance(UserId(1)).unwrap(), 800);
//! ```
//!
//! ## Thread Safety
//!
//! Operations for different users run in parallel. Operations for the same
//! user are serialized on that user's lock, so duplicate requests racing each
//! other are accepted exactly once.

mod base;
pub mod clock;
pub mod config;
pub mod error;
mod expiration;
pub mod history;
pub mod item;
mod ledger;
pub mod policy;
mod scheduler;
pub mod search;
mod store;
pub mod telemetry;
pub mod wallet;

pub use base::{HistoryId, PointItemId, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LedgerConfig, LoggingConfig, PolicyDefaults, SweepConfig};
pub use error::{ErrorKind, PointError, Result};
pub use expiration::SweepReport;
pub use history::{PointHistory, PointHistoryDetail, PointType};
pub use item::{PointItem, PointStatus};
pub use ledger::PointLedger;
pub use policy::{PointPolicy, PolicyCache, PolicyManager, PolicyStore, PolicyUpdate};
pub use scheduler::{SweepHandle, SweepScheduler};
pub use search::{
    DEFAULT_EXPIRING_WINDOW_DAYS, ExpiringPoint, HistorySearch, Page, PageRequest, TypeTotal,
};
pub use telemetry::init_tracing;
pub use wallet::Wallet;
