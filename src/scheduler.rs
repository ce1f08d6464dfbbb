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

//! In-process trigger for the expiration sweep.

use crate::PointLedger;
use crossbeam::channel::{self, Sender};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Runs [`PointLedger::run_expiration`] on a fixed interval.
pub struct SweepScheduler;

impl SweepScheduler {
    /// Spawns the sweep thread on the interval from the ledger's configuration.
    pub fn start_configured(ledger: Arc<PointLedger>) -> io::Result<SweepHandle> {
        let interval = ledger.sweep.interval();
        Self::start(ledger, interval)
    }

    /// Spawns the sweep thread. The first run happens one `interval` after start.
    pub fn start(ledger: Arc<PointLedger>, interval: Duration) -> io::Result<SweepHandle> {
        if interval.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sweep interval must be positive",
            ));
        }
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let thread = thread::Builder::new()
            .name("point-expiration-sweep".into())
            .spawn(move || {
                info!(?interval, "expiration scheduler started");
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            let report = ledger.run_expiration(None);
                            debug!(expired_items = report.expired_items, "scheduled sweep done");
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                info!("expiration scheduler stopped");
            })?;

        Ok(SweepHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Keeps the sweep thread alive; stopping or dropping it shuts the thread down.
#[derive(Debug)]
pub struct SweepHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender also wakes the select.
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("expiration scheduler thread panicked");
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;
    use crate::clock::ManualClock;
    use crate::config::LedgerConfig;
    use chrono::{TimeZone, Utc};
    use std::time::Instant;

    #[test]
    fn scheduler_expires_lots_and_stops() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let ledger =
            Arc::new(PointLedger::with_clock(&LedgerConfig::default(), clock.clone()).unwrap());
        ledger.earn(UserId(5), 1_000, false, "E-1").unwrap();
        clock.advance(chrono::Duration::days(400));

        let handle = SweepScheduler::start(Arc::clone(&ledger), Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ledger.admin_balance(UserId(5)) != 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.stop();

        assert_eq!(ledger.admin_balance(UserId(5)), 0);
        assert_eq!(ledger.total_available_remain(), 0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let ledger = Arc::new(PointLedger::new(&LedgerConfig::default()).unwrap());
        let err = SweepScheduler::start(ledger, Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn panicked_sweep_thread_does_not_escape_stop() {
        let (stop_tx, _stop_rx) = channel::bounded::<()>(1);
        let thread = thread::spawn(|| panic!("sweep failed"));
        let handle = SweepHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        handle.stop();
    }

    #[test]
    fn dropping_the_handle_stops_a_configured_scheduler() {
        let ledger = Arc::new(PointLedger::new(&LedgerConfig::default()).unwrap());
        let handle = SweepScheduler::start_configured(Arc::clone(&ledger)).unwrap();
        drop(handle);
        assert_eq!(Arc::strong_count(&ledger), 1);
    }
}
