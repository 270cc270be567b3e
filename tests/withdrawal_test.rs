mod support;

use escrow_ledger::escrow::EscrowError;
use escrow_ledger::ledger::{
    BankAccount, LedgerStore, RelatedEntity, TransactionType, WithdrawalStatus,
};
use escrow_ledger::payments::types::{PayoutInitiation, TransferStatus};
use escrow_ledger::payments::GatewayError;
use escrow_ledger::services::notification::TransitionKind;
use rust_decimal_macros::dec;
use support::{payout_verification, timeout_error, valid_bank_account, Harness, MockGateway};
use uuid::Uuid;

async fn funded(h: &Harness) -> Uuid {
    let user = Uuid::new_v4();
    h.credit(user, dec!(5000)).await;
    user
}

#[tokio::test]
async fn test_request_reserves_full_amount() {
    let h = Harness::new();
    let user = funded(&h).await;

    let withdrawal = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    assert!(withdrawal.reference.starts_with("WITHDRAW-"));
    assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    assert_eq!(withdrawal.amount, dec!(2000));
    assert_eq!(withdrawal.fee, dec!(50));
    assert_eq!(withdrawal.net_amount, dec!(1950));
    assert_eq!(h.balance(user).await, dec!(3000));

    let reservation = h
        .store
        .transactions_for_user(user)
        .await
        .unwrap()
        .into_iter()
        .find(|tx| tx.transaction_type == TransactionType::Withdrawal)
        .unwrap();
    assert_eq!(reservation.amount, dec!(2000));
    assert_eq!(reservation.related, Some(RelatedEntity::Withdrawal(withdrawal.id)));

    let events = h.sink.wait_for(1).await;
    assert!(events
        .iter()
        .any(|e| e.kind == TransitionKind::WithdrawalRequested && e.new_balance == Some(dec!(3000))));
}

#[tokio::test]
async fn test_request_validation() {
    let h = Harness::new();
    let user = funded(&h).await;

    let bad_nuban = BankAccount {
        account_number: "0152792741".to_string(),
        ..valid_bank_account()
    };
    let err = h
        .engine
        .request_withdrawal(user, dec!(2000), bad_nuban)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation { .. }));

    let err = h
        .engine
        .request_withdrawal(user, dec!(999), valid_bank_account())
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation { .. }));

    let err = h
        .engine
        .request_withdrawal(user, dec!(5001), valid_bank_account())
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InsufficientFunds { .. }));

    assert_eq!(h.balance(user).await, dec!(5000));
}

#[tokio::test]
async fn test_approve_starts_payout_once() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();

    let approved = h.engine.approve_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Processing);
    assert_eq!(approved.gateway_recipient_code.as_deref(), Some("RCP_0152792740"));
    assert_eq!(approved.gateway_transfer_code.as_deref(), Some("TRF_test"));
    assert!(approved.processed_at.is_some());

    let again = h.engine.approve_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(again.status, WithdrawalStatus::Processing);
    assert_eq!(MockGateway::calls(&h.gateway.recipient_calls), 1);
    assert_eq!(MockGateway::calls(&h.gateway.initiate_payout_calls), 1);
    assert_eq!(h.balance(user).await, dec!(3000));
}

#[tokio::test]
async fn test_successful_payout_credits_fee_to_platform() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&requested.reference).await.unwrap();

    h.gateway.script_payout(
        &requested.reference,
        Ok(payout_verification(&requested.reference, TransferStatus::Success)),
    );
    let completed = h.engine.verify_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(h.balance(user).await, dec!(3000));
    assert_eq!(h.balance(h.platform_id).await, dec!(50));

    // A late duplicate success changes nothing.
    let again = h
        .engine
        .complete_withdrawal(&requested.reference, Some("TRF_test".to_string()))
        .await
        .unwrap();
    assert_eq!(again.status, WithdrawalStatus::Completed);
    assert_eq!(h.balance(h.platform_id).await, dec!(50));
}

#[tokio::test]
async fn test_immediate_gateway_success_completes() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(1000), valid_bank_account())
        .await
        .unwrap();
    h.gateway.script_initiate_payout(Ok(PayoutInitiation {
        transfer_code: "TRF_instant".to_string(),
        status: TransferStatus::Success,
    }));

    let completed = h.engine.approve_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);
    assert_eq!(completed.gateway_transfer_code.as_deref(), Some("TRF_instant"));
    assert_eq!(h.balance(h.platform_id).await, dec!(50));
}

#[tokio::test]
async fn test_failed_payout_restores_full_amount() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&requested.reference).await.unwrap();

    h.gateway.script_payout(
        &requested.reference,
        Ok(payout_verification(&requested.reference, TransferStatus::Failed)),
    );
    let failed = h.engine.verify_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Account closed"));
    assert_eq!(h.balance(user).await, dec!(5000));
    assert_eq!(h.balance(h.platform_id).await, dec!(0));

    // Success reported after failure is refused and moves nothing.
    let err = h
        .engine
        .complete_withdrawal(&requested.reference, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    assert_eq!(h.balance(user).await, dec!(5000));
}

#[tokio::test]
async fn test_reversed_payout_restores_full_amount() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(1500), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&requested.reference).await.unwrap();

    h.gateway.script_payout(
        &requested.reference,
        Ok(payout_verification(&requested.reference, TransferStatus::Reversed)),
    );
    let reversed = h.engine.verify_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(reversed.status, WithdrawalStatus::Failed);
    assert_eq!(reversed.failure_reason.as_deref(), Some("reversed"));
    assert_eq!(h.balance(user).await, dec!(5000));

    // Duplicate failure reports do not refund twice.
    h.engine
        .fail_withdrawal(&requested.reference, "reversed")
        .await
        .unwrap();
    assert_eq!(h.balance(user).await, dec!(5000));
}

#[tokio::test]
async fn test_reject_restores_reservation() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();

    let err = h
        .engine
        .reject_withdrawal(&requested.reference, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation { .. }));

    let rejected = h
        .engine
        .reject_withdrawal(&requested.reference, "Suspicious activity")
        .await
        .unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(rejected.failure_reason.as_deref(), Some("Suspicious activity"));
    assert_eq!(h.balance(user).await, dec!(5000));

    let err = h.engine.approve_withdrawal(&requested.reference).await.unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    assert_eq!(MockGateway::calls(&h.gateway.initiate_payout_calls), 0);
}

#[tokio::test]
async fn test_processing_withdrawal_cannot_be_rejected() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&requested.reference).await.unwrap();

    let err = h
        .engine
        .reject_withdrawal(&requested.reference, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    assert_eq!(h.balance(user).await, dec!(3000));
}

#[tokio::test]
async fn test_payout_timeout_leaves_processing() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.gateway.script_initiate_payout(Err(timeout_error()));

    let err = h.engine.approve_withdrawal(&requested.reference).await.unwrap_err();
    assert!(matches!(err, EscrowError::Gateway(_)));

    let stored = h.engine.withdrawal(&requested.reference).await.unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Processing);
    assert_eq!(stored.gateway_recipient_code.as_deref(), Some("RCP_0152792740"));
    assert_eq!(h.balance(user).await, dec!(3000));

    // Still unknown upstream: nothing moves.
    let polled = h.engine.verify_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(polled.status, WithdrawalStatus::Processing);

    h.gateway.script_payout(
        &requested.reference,
        Ok(payout_verification(&requested.reference, TransferStatus::Success)),
    );
    let completed = h.engine.verify_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);
    assert_eq!(MockGateway::calls(&h.gateway.initiate_payout_calls), 1);
}

#[tokio::test]
async fn test_verify_skips_gateway_unless_processing() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();

    let polled = h.engine.verify_withdrawal(&requested.reference).await.unwrap();
    assert_eq!(polled.status, WithdrawalStatus::Pending);
    assert_eq!(MockGateway::calls(&h.gateway.verify_payout_calls), 0);

    let err = h.engine.verify_withdrawal("WITHDRAW-0-missing").await.unwrap_err();
    assert!(matches!(err, EscrowError::NotFound { .. }));
}

#[tokio::test]
async fn test_verify_gateway_error_is_reported_without_change() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.engine.approve_withdrawal(&requested.reference).await.unwrap();
    h.gateway.script_payout(&requested.reference, Err(timeout_error()));

    let err = h.engine.verify_withdrawal(&requested.reference).await.unwrap_err();
    assert!(matches!(err, EscrowError::Gateway(_)));
    assert_eq!(
        h.engine.withdrawal(&requested.reference).await.unwrap().status,
        WithdrawalStatus::Processing
    );
    assert_eq!(h.balance(user).await, dec!(3000));
}

fn rejection(message: &str) -> GatewayError {
    GatewayError::ValidationError {
        message: message.to_string(),
        field: None,
    }
}

#[tokio::test]
async fn test_rejected_payout_initiation_restores_funds() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.gateway
        .script_initiate_payout(Err(rejection("Your balance is not enough to fulfil this request")));

    let err = h.engine.approve_withdrawal(&requested.reference).await.unwrap_err();
    assert!(matches!(err, EscrowError::Gateway(_)));

    let withdrawal = h.engine.withdrawal(&requested.reference).await.unwrap();
    assert_eq!(withdrawal.status, WithdrawalStatus::Failed);
    assert!(withdrawal
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("balance is not enough"));
    assert_eq!(h.balance(user).await, dec!(5000));

    // Terminal: a retried approval neither reaches the gateway nor moves money.
    let err = h.engine.approve_withdrawal(&requested.reference).await.unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    assert_eq!(MockGateway::calls(&h.gateway.initiate_payout_calls), 1);
    assert_eq!(h.balance(user).await, dec!(5000));
}

#[tokio::test]
async fn test_recipient_failure_restores_funds() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.gateway.fail_recipient(rejection("Account details could not be resolved"));

    let err = h.engine.approve_withdrawal(&requested.reference).await.unwrap_err();
    assert!(matches!(err, EscrowError::Gateway(_)));
    assert_eq!(
        h.engine.withdrawal(&requested.reference).await.unwrap().status,
        WithdrawalStatus::Failed
    );
    assert_eq!(MockGateway::calls(&h.gateway.initiate_payout_calls), 0);
    assert_eq!(h.balance(user).await, dec!(5000));
}

#[tokio::test]
async fn test_recipient_timeout_restores_funds() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();
    h.gateway.fail_recipient(timeout_error());

    assert!(h.engine.approve_withdrawal(&requested.reference).await.is_err());
    assert_eq!(
        h.engine.withdrawal(&requested.reference).await.unwrap().status,
        WithdrawalStatus::Failed
    );
    assert_eq!(h.balance(user).await, dec!(5000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_cannot_overdraw() {
    let h = Harness::new();
    let user = funded(&h).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .request_withdrawal(user, dec!(3000), valid_bank_account())
                .await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(e, EscrowError::InsufficientFunds { .. })),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(h.balance(user).await, dec!(2000));
    assert_eq!(h.store.ledger_sum(user).await, dec!(2000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_withdrawal_and_earning_race_keeps_both() {
    for _ in 0..20 {
        let h = Harness::new();
        let vendor = funded(&h).await;
        let buyer = Uuid::new_v4();
        let order = h.register_order(buyer, vendor, dec!(4000)).await;
        let held = h.held_payment(buyer, order).await;

        let withdraw = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .request_withdrawal(vendor, dec!(2000), valid_bank_account())
                    .await
            })
        };
        let release = {
            let engine = h.engine.clone();
            let reference = held.reference.clone();
            tokio::spawn(async move { engine.release_to_recipient(&reference).await })
        };
        withdraw.await.unwrap().unwrap();
        release.await.unwrap().unwrap();

        // 5000 - 2000 reserved + 3600 earned
        assert_eq!(h.balance(vendor).await, dec!(6600));
        assert_eq!(h.store.ledger_sum(vendor).await, dec!(6600));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_start_one_payout() {
    let h = Harness::new();
    let user = funded(&h).await;
    let requested = h
        .engine
        .request_withdrawal(user, dec!(2000), valid_bank_account())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let engine = h.engine.clone();
        let reference = requested.reference.clone();
        handles.push(tokio::spawn(async move {
            engine.approve_withdrawal(&reference).await
        }));
    }
    for handle in handles {
        let withdrawal = handle.await.unwrap().unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Processing);
    }

    assert_eq!(MockGateway::calls(&h.gateway.recipient_calls), 1);
    assert_eq!(MockGateway::calls(&h.gateway.initiate_payout_calls), 1);
    assert_eq!(h.balance(user).await, dec!(3000));
}
