//! Billing core for client work items: the work lifecycle state machine,
//! the append-only payment ledger backing each work's balance, and the
//! one-shot history snapshot written when a work reaches final completion.

pub mod balance;
pub mod client;
pub mod error;
pub mod history;
pub mod ledger;
pub mod service;
pub mod utils;
pub mod work;
