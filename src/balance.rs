//! Balance derivation. The ledger is the single source of truth: nothing in
//! this crate persists an "is paid" flag, every decision recomputes from the
//! payment sum at the moment it is taken.

/// Outstanding balance for a work: `fees - total_paid`, floored at zero.
pub fn remaining(fees: u64, total_paid: u64) -> u64 {
    fees.saturating_sub(total_paid)
}

/// True exactly when the fees are covered in full.
pub fn is_settled(fees: u64, total_paid: u64) -> bool {
    remaining(fees, total_paid) == 0
}
