//! Accrual Ledger Core
//!
//! Cashback order registry, accrual reconciliation against an external
//! provider, and the balance ledger that guards withdrawals.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               AccrualService (facade)                 │
//! │   register / list / balance / withdraw / refresh     │
//! └───────┬──────────────┬───────────────┬───────────────┘
//!         │              │               │
//!         ▼              ▼               ▼
//!  OrderRegistry   BalanceLedger   WithdrawalAdmission
//!         │              │               │
//!         └──────────────┼───────────────┘
//!                        ▼
//!          OrderStore / LedgerStore (Postgres | memory)
//!                        ▲
//!                        │ conditional UPDATE
//! ┌──────────────────────┴───────────────────────────────┐
//! │  AccrualPoller ──▶ bounded queue ──▶ N workers        │
//! │                                   (Reconciler)        │
//! └──────────────────────────────────────┬───────────────┘
//!                                        │ GET /api/orders/{n}
//!                                        ▼
//!                                 Accrual provider
//! ```
//!
//! # Invariants
//!
//! - Order numbers are Luhn-valid and owned by exactly one user
//! - Order status only moves forward: NEW → PROCESSING → PROCESSED | INVALID
//! - A withdrawal never takes a user's balance below zero
//! - Money is `Decimal`; balances are re-derived from storage on every read

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod balance;
pub mod config;
pub mod error;
pub mod luhn;
pub mod metrics;
pub mod poller;
pub mod provider;
pub mod registry;
pub mod service;
pub mod storage;
pub mod types;
pub mod withdrawal;

// Re-exports
pub use balance::BalanceLedger;
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use poller::{
    AccrualPoller, PollerHandle, ReconcileOutcome, ReconcileQueue, Reconciler, TickReport,
};
pub use provider::{AccrualClient, AccrualProvider};
pub use registry::OrderRegistry;
pub use service::AccrualService;
pub use storage::{LedgerStore, MemoryStore, OrderStore, PostgresStore};
pub use types::{
    AccrualReport, Balance, LedgerTotals, Order, OrderNumber, OrderStatus, ProviderStatus,
    Registration, Withdrawal,
};
pub use withdrawal::WithdrawalAdmission;
