//! A toy bank served over `udp-rpc`.
//!
//! - [`protocol`] — op codes, currencies and payload layouts
//! - [`ledger`]   — in-memory accounts with per-account locking
//! - [`service`]  — [`BankService`], the server-side dispatch target
//! - [`client`]   — [`BankClient`] sessions and [`Monitor`] listeners

pub mod client;
pub mod ledger;
pub mod protocol;
pub mod service;

pub use client::{BankClient, ClientError, Monitor};
pub use ledger::{Ledger, LedgerError};
pub use protocol::{AccountInfo, AccountUpdate, Credentials, Currency, OpCode};
pub use service::BankService;
