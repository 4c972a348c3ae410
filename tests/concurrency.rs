//! Threaded checks for the invariants that only matter under contention:
//! concurrent payments must never jointly overpay, and concurrent finalise
//! calls must produce exactly one history snapshot.

use sled::open;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use work_billing::{
    error::BillingError,
    service::BillingService,
    work::{TimeStamp, WorkStatus},
};

fn open_service(name: &str) -> anyhow::Result<(tempfile::TempDir, Arc<BillingService>)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let service = BillingService::open(Arc::new(db))?;
    Ok((temp_dir, Arc::new(service)))
}

#[test]
fn concurrent_payments_never_jointly_overpay() -> anyhow::Result<()> {
    let (_guard, service) = open_service("concurrent_payments.db")?;

    let client = service.add_client("Sharma & Sons", "ABCDE1234F")?;
    let work = service.add_work(&client.id, "Audit FY 2024-25", 100_000)?;

    // eight submissions of 30k against 100k of fees: at most three can land
    let mut handles = vec![];
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let work_id = work.id.clone();
        handles.push(thread::spawn(move || {
            service.add_payment(&work_id, 30_000, TimeStamp::new())
        }));
    }

    let mut accepted = 0u64;
    for handle in handles {
        match handle.join().expect("payment thread panicked") {
            Ok(_) => accepted += 1,
            Err(err) => {
                // every rejection must be an overpayment, nothing stranger
                assert!(matches!(
                    err.downcast_ref::<BillingError>(),
                    Some(BillingError::OverpaymentRejected { .. })
                ));
            }
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(service.total_paid(&work.id)?, 90_000);
    assert_eq!(service.list_payments(&work.id)?.len(), 3);

    Ok(())
}

#[test]
fn concurrent_finalise_creates_exactly_one_snapshot() -> anyhow::Result<()> {
    let (_guard, service) = open_service("concurrent_finalise.db")?;

    let client = service.add_client("Sharma & Sons", "ABCDE1234F")?;
    let work = service.add_work(&client.id, "GST annual return", 50_000)?;
    service.mark_completed(&work.id)?;
    service.add_payment(&work.id, 50_000, TimeStamp::new())?;

    let mut handles = vec![];
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let work_id = work.id.clone();
        handles.push(thread::spawn(move || service.finalize(&work_id)));
    }

    let mut winners = 0u64;
    for handle in handles {
        match handle.join().expect("finalise thread panicked") {
            Ok(done) => {
                assert_eq!(done.status, WorkStatus::FinalCompleted);
                winners += 1;
            }
            Err(err) => {
                assert_eq!(
                    err.downcast_ref::<BillingError>(),
                    Some(&BillingError::AlreadyFinal)
                );
            }
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(service.list_history()?.len(), 1);

    let snapshot = service.snapshot_for_work(&work.id)?.unwrap();
    assert_eq!(snapshot.total_paid, 50_000);
    assert_eq!(snapshot.payment_details.len(), 1);

    Ok(())
}

#[test]
fn payment_racing_finalise_settles_consistently() -> anyhow::Result<()> {
    let (_guard, service) = open_service("payment_vs_finalise.db")?;

    let client = service.add_client("Verma Traders", "FGHIJ5678K")?;
    let work = service.add_work(&client.id, "Bookkeeping retainer", 100_000)?;
    service.mark_completed(&work.id)?;
    service.add_payment(&work.id, 70_000, TimeStamp::new())?;

    let payer = {
        let service = Arc::clone(&service);
        let work_id = work.id.clone();
        thread::spawn(move || service.add_payment(&work_id, 30_000, TimeStamp::new()))
    };
    let finaliser = {
        let service = Arc::clone(&service);
        let work_id = work.id.clone();
        thread::spawn(move || service.finalize(&work_id))
    };

    // the closing payment always fits (70k paid of 100k)
    payer.join().expect("payment thread panicked")?;

    match finaliser.join().expect("finalise thread panicked") {
        // finalise observed the settled ledger
        Ok(done) => assert_eq!(done.status, WorkStatus::FinalCompleted),
        // finalise ran before the payment landed; the balance it reported
        // must be the pre-payment shortfall, and a retry now succeeds
        Err(err) => {
            assert_eq!(
                err.downcast_ref::<BillingError>(),
                Some(&BillingError::PaymentPending {
                    remaining: 30_000,
                    fees: 100_000,
                    paid: 70_000,
                })
            );
            service.finalize(&work.id)?;
        }
    }

    assert_eq!(service.get_work(&work.id)?.status, WorkStatus::FinalCompleted);
    assert_eq!(service.list_history()?.len(), 1);
    assert_eq!(service.snapshot_for_work(&work.id)?.unwrap().total_paid, 100_000);

    Ok(())
}
