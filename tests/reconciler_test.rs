mod support;

use escrow_ledger::config::ReconcilerConfig;
use escrow_ledger::ledger::{PaymentStatus, WithdrawalStatus};
use escrow_ledger::payments::types::{ChargeStatus, ChargeVerification, TransferStatus};
use escrow_ledger::workers::payment_reconciler::PaymentReconcilerWorker;
use rust_decimal_macros::dec;
use std::time::Duration;
use support::{
    charge_with_status, payout_verification, timeout_error, valid_bank_account, Harness,
    MockGateway,
};
use tokio::sync::watch;
use uuid::Uuid;

fn worker(h: &Harness, max_attempts: u32) -> PaymentReconcilerWorker {
    worker_with_batch(h, max_attempts, 50)
}

fn worker_with_batch(h: &Harness, max_attempts: u32, batch_size: i64) -> PaymentReconcilerWorker {
    PaymentReconcilerWorker::new(
        h.engine.clone(),
        h.store.clone(),
        ReconcilerConfig {
            enabled: true,
            poll_interval: Duration::from_millis(20),
            stale_after: Duration::ZERO,
            batch_size,
            max_attempts,
        },
    )
}

async fn pending_funding(h: &Harness, user: Uuid, amount: rust_decimal::Decimal) -> String {
    h.engine
        .initialize_wallet_funding(user, "user@example.com", amount, None)
        .await
        .unwrap()
        .payment
        .reference
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_stale_payments_are_settled() {
    let h = Harness::new();
    let (paid_user, abandoned_user) = (Uuid::new_v4(), Uuid::new_v4());
    let paid = pending_funding(&h, paid_user, dec!(1000)).await;
    let abandoned = pending_funding(&h, abandoned_user, dec!(2000)).await;
    h.gateway.script_charge(&paid, Ok(ChargeVerification::successful(&paid, dec!(1000))));
    h.gateway.script_charge(
        &abandoned,
        Ok(charge_with_status(&abandoned, ChargeStatus::Abandoned, dec!(2000))),
    );
    settle().await;

    let mut worker = worker(&h, 5);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 2);
    assert_eq!(report.payments_resolved, 2);

    assert_eq!(h.engine.payment(&paid).await.unwrap().status, PaymentStatus::Released);
    assert_eq!(h.balance(paid_user).await, dec!(1000));
    assert_eq!(
        h.engine.payment(&abandoned).await.unwrap().status,
        PaymentStatus::Failed
    );
    assert_eq!(h.balance(abandoned_user).await, dec!(0));

    // Nothing is left for the next cycle.
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 0);
}

#[tokio::test]
async fn test_unresolved_payment_backs_off() {
    let h = Harness::new();
    let reference = pending_funding(&h, Uuid::new_v4(), dec!(500)).await;
    settle().await;

    let mut worker = worker(&h, 5);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 1);
    assert_eq!(report.payments_resolved, 0);

    // Second attempt waits out the backoff window.
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 0);
    assert_eq!(MockGateway::calls(&h.gateway.verify_charge_calls), 1);
    assert_eq!(
        h.engine.payment(&reference).await.unwrap().status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_gateway_errors_never_fail_payments() {
    let h = Harness::new();
    let reference = pending_funding(&h, Uuid::new_v4(), dec!(500)).await;
    h.gateway.script_charge(&reference, Err(timeout_error()));
    settle().await;

    let mut worker = worker(&h, 1);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 1);
    assert_eq!(report.payments_resolved, 0);
    assert_eq!(
        h.engine.payment(&reference).await.unwrap().status,
        PaymentStatus::Pending
    );

    // Attempts exhausted: left for manual review.
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 0);
}

#[tokio::test]
async fn test_exhausted_payment_does_not_block_newer_ones() {
    let h = Harness::new();
    let stuck = pending_funding(&h, Uuid::new_v4(), dec!(500)).await;
    settle().await;
    let paid_user = Uuid::new_v4();
    let paid = pending_funding(&h, paid_user, dec!(1200)).await;
    h.gateway.script_charge(&paid, Ok(ChargeVerification::successful(&paid, dec!(1200))));
    settle().await;

    let mut worker = worker_with_batch(&h, 1, 1);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 1);
    assert_eq!(report.payments_resolved, 0);
    assert_eq!(report.tracked, 1);

    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 1);
    assert_eq!(report.payments_resolved, 1);
    assert_eq!(h.engine.payment(&paid).await.unwrap().status, PaymentStatus::Released);
    assert_eq!(h.balance(paid_user).await, dec!(1200));
    assert_eq!(
        h.engine.payment(&stuck).await.unwrap().status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_exhausted_withdrawal_does_not_block_newer_ones() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.credit(user, dec!(5000)).await;
    let stuck = h
        .engine
        .request_withdrawal(user, dec!(1000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&stuck.reference).await.unwrap();
    settle().await;
    let done = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&done.reference).await.unwrap();
    h.gateway.script_payout(
        &done.reference,
        Ok(payout_verification(&done.reference, TransferStatus::Success)),
    );
    settle().await;

    let mut worker = worker_with_batch(&h, 1, 1);
    assert_eq!(worker.run_cycle().await.unwrap().withdrawals_resolved, 0);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.withdrawals_checked, 1);
    assert_eq!(report.withdrawals_resolved, 1);
    assert_eq!(
        h.engine.withdrawal(&done.reference).await.unwrap().status,
        WithdrawalStatus::Completed
    );
}

#[tokio::test]
async fn test_settled_elsewhere_is_forgotten() {
    let h = Harness::new();
    let reference = pending_funding(&h, Uuid::new_v4(), dec!(800)).await;
    settle().await;

    let mut worker = worker(&h, 5);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.tracked, 1);

    // A webhook settles it while the worker is backing off.
    h.engine
        .confirm_charge(&reference, ChargeVerification::successful(&reference, dec!(800)))
        .await
        .unwrap();
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 0);
    assert_eq!(report.tracked, 0);
}

#[tokio::test]
async fn test_fresh_payments_are_left_alone() {
    let h = Harness::new();
    pending_funding(&h, Uuid::new_v4(), dec!(500)).await;

    let mut worker = PaymentReconcilerWorker::new(
        h.engine.clone(),
        h.store.clone(),
        ReconcilerConfig::default(),
    );
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.payments_checked, 0);
    assert_eq!(MockGateway::calls(&h.gateway.verify_charge_calls), 0);
}

#[tokio::test]
async fn test_processing_withdrawals_are_settled() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    h.credit(user, dec!(5000)).await;

    let completed = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&completed.reference).await.unwrap();
    let failed = h
        .engine
        .request_withdrawal(user, dec!(1000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&failed.reference).await.unwrap();
    assert_eq!(h.balance(user).await, dec!(2000));

    h.gateway.script_payout(
        &completed.reference,
        Ok(payout_verification(&completed.reference, TransferStatus::Success)),
    );
    h.gateway.script_payout(
        &failed.reference,
        Ok(payout_verification(&failed.reference, TransferStatus::Failed)),
    );
    settle().await;

    let mut worker = worker(&h, 5);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.withdrawals_checked, 2);
    assert_eq!(report.withdrawals_resolved, 2);

    assert_eq!(
        h.engine.withdrawal(&completed.reference).await.unwrap().status,
        WithdrawalStatus::Completed
    );
    assert_eq!(
        h.engine.withdrawal(&failed.reference).await.unwrap().status,
        WithdrawalStatus::Failed
    );
    assert_eq!(h.balance(user).await, dec!(3000));
    assert_eq!(h.balance(h.platform_id).await, dec!(50));
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let h = Harness::new();
    let reference = pending_funding(&h, Uuid::new_v4(), dec!(750)).await;
    h.gateway.script_charge(
        &reference,
        Ok(ChargeVerification::successful(&reference, dec!(750))),
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(worker(&h, 5).run(rx));

    let mut settled = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if h.engine.payment(&reference).await.unwrap().status == PaymentStatus::Released {
            settled = true;
            break;
        }
    }
    assert!(settled, "background cycle should settle the payment");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker should stop")
        .unwrap();
}
