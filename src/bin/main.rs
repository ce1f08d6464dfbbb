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

use chrono::NaiveDate;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use point_ledger_rs::{
    LedgerConfig, PointError, PointItemId, PointLedger, PointType, UserId, init_tracing,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, info, warn};

/// Point Ledger - Replay point operations from a CSV file
///
/// Reads operations from a CSV file, applies them to an in-memory ledger and
/// writes the resulting wallet balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "point-ledger")]
#[command(about = "A points ledger that replays operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,user,ref,amount,item
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run an expiration sweep for this date after replaying
    #[arg(long, value_name = "YYYY-MM-DD")]
    expire_at: Option<NaiveDate>,
}

fn main() {
    let args = Args::parse();

    let config = match LedgerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Error initializing logging: {}", e);
    }

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let ledger = match PointLedger::new(&config) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("Error creating ledger: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = process_operations(&ledger, BufReader::new(file)) {
        eprintln!("Error processing operations: {}", e);
        process::exit(1);
    }

    if let Some(date) = args.expire_at {
        let report = ledger.run_expiration(Some(date));
        info!(
            expired_items = report.expired_items,
            expired_amount = report.expired_amount,
            "expiration sweep finished"
        );
    }

    if let Err(e) = write_balances(&ledger, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, ref, amount, item`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op_type: String,
    user: u64,
    #[serde(rename = "ref", default)]
    ref_id: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    item: Option<u64>,
}

/// A parsed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Earn { user: UserId, amount: i64, ref_id: String, manual: bool },
    Use { user: UserId, amount: i64, ref_id: String },
    CancelUse { user: UserId, amount: i64, ref_id: String },
    CancelEarn { user: UserId, target: EarnTarget, manual: bool },
}

/// How a cancel-earn row names its lot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EarnTarget {
    Item(PointItemId),
    Ref(String),
}

impl CsvRecord {
    /// Converts CSV record to an Operation.
    ///
    /// Returns `None` for unknown types or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let user = UserId(self.user);
        let ref_id = self.ref_id;

        match self.op_type.to_lowercase().as_str() {
            kind @ ("earn" | "grant") => Some(Operation::Earn {
                user,
                amount: self.amount?,
                ref_id,
                manual: kind == "grant",
            }),
            "use" => Some(Operation::Use {
                user,
                amount: self.amount?,
                ref_id,
            }),
            "cancel_use" => Some(Operation::CancelUse {
                user,
                amount: self.amount?,
                ref_id,
            }),
            kind @ ("cancel_earn" | "revoke") => {
                let target = match self.item {
                    Some(id) => EarnTarget::Item(PointItemId(id)),
                    None if !ref_id.is_empty() => EarnTarget::Ref(ref_id),
                    None => return None,
                };
                Some(Operation::CancelEarn {
                    user,
                    target,
                    manual: kind == "revoke",
                })
            }
            _ => None,
        }
    }
}

/// Applies one operation to the ledger.
fn apply(ledger: &PointLedger, op: Operation) -> Result<(), PointError> {
    match op {
        Operation::Earn { user, amount, ref_id, manual } => {
            ledger.earn(user, amount, manual, &ref_id).map(|_| ())
        }
        Operation::Use { user, amount, ref_id } => ledger.use_points(user, amount, &ref_id),
        Operation::CancelUse { user, amount, ref_id } => {
            ledger.cancel_use(user, &ref_id, amount)
        }
        Operation::CancelEarn { user, target, manual } => {
            let item_id = match target {
                EarnTarget::Item(id) => id,
                EarnTarget::Ref(ref_id) => earned_item(ledger, user, &ref_id, manual)?,
            };
            ledger.cancel_earn(user, item_id, manual)
        }
    }
}

/// Finds the lot created by the earn or grant recorded under `ref_id`.
fn earned_item(
    ledger: &PointLedger,
    user: UserId,
    ref_id: &str,
    manual: bool,
) -> Result<PointItemId, PointError> {
    let wanted = if manual {
        PointType::AdminGrant
    } else {
        PointType::Earn
    };
    ledger
        .histories_for_ref(user, ref_id)
        .iter()
        .filter(|h| h.point_type() == wanted)
        .find_map(|h| h.details().first().map(|d| d.item_id))
        .ok_or(PointError::ItemNotFound)
}

/// Process operations from a CSV reader.
///
/// Rows are streamed, so input size is not bounded by memory. Malformed rows
/// and rejected operations are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, user, ref, amount, item`
/// - `type`: earn, grant, use, cancel_use, cancel_earn or revoke
/// - `user`: User ID (u64)
/// - `ref`: Request or order reference
/// - `amount`: Whole points (unused for cancel_earn/revoke)
/// - `item`: Lot id for cancel_earn/revoke; when empty the lot earned under
///   `ref` is used
///
/// # Example
///
/// ```csv
/// type,user,ref,amount,item
/// earn,1,signup,1000,
/// use,1,order-1,300,
/// cancel_use,1,order-1,100,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<R: Read>(ledger: &PointLedger, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(line, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(op) = record.into_operation() else {
            debug!(line, "skipping unknown operation");
            continue;
        };
        if let Err(e) = apply(ledger, op) {
            warn!(line, code = e.code(), error = %e, "operation rejected");
        }
    }

    Ok(())
}

/// Write wallet balances to a CSV writer.
///
/// # CSV Format
///
/// Columns: `user, balance`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(ledger: &PointLedger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for wallet in ledger.wallets() {
        wtr.serialize(&wallet)?;
    }

    wtr.flush()?;
    Ok(())
}
