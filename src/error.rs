use super::work::WorkStatus;

/// Typed, recoverable errors for the billing core. Everything here is safe
/// to retry except recreating an entity that already exists; nothing is
/// fatal to the process.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BillingError {
    #[error("payment amount must be greater than zero")]
    InvalidAmount,
    #[error("payment of {attempted} paise exceeds remaining balance of {remaining} paise")]
    OverpaymentRejected { attempted: u64, remaining: u64 },
    #[error("illegal status change {from:?} -> {to:?}")]
    InvalidTransition { from: WorkStatus, to: WorkStatus },
    #[error("cannot finalise: {remaining} of {fees} paise still outstanding ({paid} paid)")]
    PaymentPending { remaining: u64, fees: u64, paid: u64 },
    #[error("work is already final completed")]
    AlreadyFinal,
    #[error("work in status {status:?} cannot be deleted before final completion")]
    WorkNotDeletable { status: WorkStatus },
    // Internal to the history snapshot writer. record_completion converts
    // this to success; it must never reach a finalise caller.
    #[error("a history snapshot already exists for this work")]
    DuplicateSnapshot,
    #[error("no record found for id {0}")]
    NotFound(String),
}
