//! Domain types and ledger rules for the soderia backend.
//!
//! Everything here is pure: callers fetch state from storage, run it through
//! these functions and persist the results inside their own transaction.

pub mod ledger;
pub mod report;
pub mod types;
pub mod validate;
