//! Reconciliation, overdue sweep and checkout tests against the in-memory store

mod support;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use serde_json::json;

use core_kernel::grace_cutoff;
use domain_lending::{
    ActionId, ActionInput, ApplyOutcome, CallbackOutcome, CreateOrder, InstallmentStatus, LendingError,
    LendingEvent, Loan, LoanStatus, OrderStatus, PaymentOrderPort, RequestStatus, SweepOutcome,
    SweeperConfig,
};

use support::{confirmation, gateway, Harness, Parties};

const EMI: rust_decimal::Decimal = dec!(3998.20);

fn sweep_config(late_fee: rust_decimal::Decimal) -> SweeperConfig {
    SweeperConfig {
        late_fee,
        ..SweeperConfig::default()
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

mod reconciler_tests {
    use super::*;

    #[tokio::test]
    async fn test_payment_settles_earliest_installment() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        let outcome = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-1", EMI, 1))
            .await
            .unwrap();

        let ApplyOutcome::Applied(application) = outcome else {
            panic!("expected a fresh application");
        };
        assert_eq!(application.payments.len(), 1);
        assert_eq!(application.loan.paid_installments, 1);
        assert_eq!(application.loan.total_paid, EMI);
        assert_eq!(application.loan.remaining_balance, dec!(41451.80));

        let installments = harness.repayments().installments(loan.id).await.unwrap();
        assert_eq!(installments[0].status, InstallmentStatus::Paid);
        assert_eq!(installments[0].paid_amount, Some(EMI));
        assert!(installments[1..].iter().all(|i| i.status == InstallmentStatus::Pending));
    }

    #[tokio::test]
    async fn test_short_amount_is_rejected() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        let result = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-1", dec!(3000), 1))
            .await;

        match result {
            Err(LendingError::AmountMismatch { expected, claimed }) => {
                assert_eq!(expected, EMI);
                assert_eq!(claimed, dec!(3000));
            }
            other => panic!("expected AmountMismatch, got {:?}", other),
        }
        assert!(harness.store.all_payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_excess_amount_is_rejected_whole() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        for (reference, amount, count) in [("TXN-OVER-1", dec!(5000.00), 1), ("TXN-OVER-2", EMI * dec!(2) + dec!(1), 2)] {
            let result = harness
                .reconciler
                .apply_payment(confirmation(&loan, reference, amount, count))
                .await;
            match result {
                Err(LendingError::AmountMismatch { expected, claimed }) => {
                    assert_eq!(expected, EMI * rust_decimal::Decimal::from(count));
                    assert_eq!(claimed, amount);
                }
                other => panic!("expected AmountMismatch, got {:?}", other),
            }
        }

        assert!(harness.store.all_payments().await.is_empty());
        let stored = harness.repayments().get_loan(loan.id).await.unwrap();
        assert_eq!(stored.paid_installments, 0);
    }

    #[tokio::test]
    async fn test_redelivery_is_a_no_op() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        let first = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-1", EMI, 1))
            .await
            .unwrap();
        let after_first = harness.repayments().get_loan(loan.id).await.unwrap();

        let second = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-1", EMI, 1))
            .await
            .unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.application().payments, second.application().payments);
        assert_eq!(harness.store.all_payments().await.len(), 1);

        let after_second = harness.repayments().get_loan(loan.id).await.unwrap();
        assert_eq!(after_second.paid_installments, after_first.paid_installments);
        assert_eq!(after_second.total_paid, after_first.total_paid);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_apply_once() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        let (a, b) = tokio::join!(
            harness.reconciler.apply_payment(confirmation(&loan, "TXN-RACE", EMI, 1)),
            harness.reconciler.apply_payment(confirmation(&loan, "TXN-RACE", EMI, 1)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!([a.is_duplicate(), b.is_duplicate()].iter().filter(|d| **d).count(), 1);
        assert_eq!(harness.store.all_payments().await.len(), 1);
        let stored = harness.repayments().get_loan(loan.id).await.unwrap();
        assert_eq!(stored.paid_installments, 1);
    }

    #[tokio::test]
    async fn test_pay_ahead_settles_in_due_order() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        let outcome = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-AHEAD", EMI * dec!(3), 3))
            .await
            .unwrap();

        let payments = &outcome.application().payments;
        assert_eq!(payments.len(), 3);
        assert!(payments.iter().all(|p| p.external_reference == "TXN-AHEAD"));

        let installments = harness.repayments().installments(loan.id).await.unwrap();
        let paid: Vec<u32> = installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Paid)
            .map(|i| i.sequence)
            .collect();
        assert_eq!(paid, vec![1, 2, 3]);
        assert_eq!(outcome.application().loan.paid_installments, 3);
    }

    #[tokio::test]
    async fn test_final_payment_completes_loan_and_request() {
        let harness = Harness::new();
        let (request, loan) = harness.disburse(&Parties::new()).await;
        let mut events = harness.events.subscribe();

        let total = EMI * dec!(11) + dec!(3998.16);
        assert_eq!(total, dec!(47978.36));
        let outcome = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-ALL", total, 12))
            .await
            .unwrap();

        let loan_after = &outcome.application().loan;
        assert_eq!(loan_after.status, LoanStatus::Completed);
        assert_eq!(loan_after.remaining_balance, dec!(0));
        assert_eq!(loan_after.total_paid, total);

        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);

        match events.recv().await.unwrap() {
            LendingEvent::PaymentApplied { installments, amount, loan_status, .. } => {
                assert_eq!(installments, 12);
                assert_eq!(amount, total);
                assert_eq!(loan_status, LoanStatus::Completed);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let again = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-AFTER", EMI, 1))
            .await;
        assert!(matches!(again, Err(LendingError::NothingToApply(_))));
    }

    #[tokio::test]
    async fn test_defaulted_loan_accepts_nothing() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (request, loan) = harness.disburse(&parties).await;

        harness
            .act(&request, "mark-defaulted", &parties.admin, ActionInput::default())
            .await;
        let stored = harness.repayments().get_loan(loan.id).await.unwrap();
        assert_eq!(stored.status, LoanStatus::Defaulted);

        let result = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-LATE", EMI, 1))
            .await;
        assert!(matches!(result, Err(LendingError::NothingToApply(_))));
    }

    #[tokio::test]
    async fn test_reference_cannot_move_between_loans() {
        let harness = Harness::new();
        let (_, first) = harness.disburse(&Parties::new()).await;
        let (_, second) = harness.disburse(&Parties::new()).await;

        harness
            .reconciler
            .apply_payment(confirmation(&first, "TXN-SHARED", EMI, 1))
            .await
            .unwrap();
        let result = harness
            .reconciler
            .apply_payment(confirmation(&second, "TXN-SHARED", EMI, 1))
            .await;
        assert!(matches!(result, Err(LendingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_blank_reference_is_rejected() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;

        let result = harness.reconciler.apply_payment(confirmation(&loan, "  ", EMI, 1)).await;
        assert!(matches!(result, Err(LendingError::Validation(_))));
    }
}

// ============================================================================
// Overdue sweep
// ============================================================================

mod sweeper_tests {
    use super::*;

    /// Commits what a sweep's transaction commits, without its cascade
    async fn mark_overdue_without_cascade(harness: &Harness, loan: &Loan) {
        let now = Utc::now() + Duration::days(40);
        let cutoff = grace_cutoff(now, SweeperConfig::default().grace_period_days);

        let mut tx = harness.repayments().begin().await.unwrap();
        let mut stored = tx.lock_loan(loan.id).await.unwrap();
        assert_eq!(tx.mark_overdue(loan.id, cutoff, dec!(0)).await.unwrap(), 1);
        let installments = tx.installments(loan.id).await.unwrap();
        stored.recompute(&installments, now);
        tx.save_loan(&stored).await.unwrap();
        tx.commit().await.unwrap();
    }

    /// A payment lands between the sweep's commit and its cascade, and the
    /// cascade then marks a caught-up request overdue
    async fn drifted_request(harness: &Harness) -> (domain_lending::LoanRequest, Loan) {
        let (request, loan) = harness.disburse(&Parties::new()).await;
        mark_overdue_without_cascade(harness, &loan).await;

        let outcome = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-CATCHUP", EMI, 1))
            .await
            .unwrap();
        assert_eq!(outcome.application().loan.overdue_installments, 0);
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::AmountDisbursed);

        harness
            .engine
            .apply_system(request.id, ActionId::MarkOverdue)
            .await
            .unwrap();
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::PaymentOverdue);
        (request, loan)
    }

    #[tokio::test]
    async fn test_sweep_repairs_request_left_overdue_by_stale_cascade() {
        let harness = Harness::new();
        let (request, loan) = drifted_request(&harness).await;

        let SweepOutcome::Completed(report) = harness
            .sweeper(SweeperConfig::default())
            .run_once(Utc::now())
            .await
            .unwrap()
        else {
            panic!("sweep should not be skipped");
        };

        assert_eq!(report.loans_updated, 0);
        assert_eq!(report.installments_marked, 0);
        assert_eq!(report.requests_synced, vec![loan.id]);
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::AmountDisbursed);
    }

    #[tokio::test]
    async fn test_next_payment_repairs_request_left_overdue() {
        let harness = Harness::new();
        let (request, loan) = drifted_request(&harness).await;

        harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-NEXT", EMI, 1))
            .await
            .unwrap();

        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::AmountDisbursed);
    }

    #[tokio::test]
    async fn test_sweep_marks_request_whose_cascade_never_ran() {
        let harness = Harness::new();
        let (request, loan) = harness.disburse(&Parties::new()).await;
        mark_overdue_without_cascade(&harness, &loan).await;

        let SweepOutcome::Completed(report) = harness
            .sweeper(SweeperConfig::default())
            .run_once(Utc::now())
            .await
            .unwrap()
        else {
            panic!("sweep should not be skipped");
        };

        assert_eq!(report.requests_synced, vec![loan.id]);
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::PaymentOverdue);
    }

    #[tokio::test]
    async fn test_sweep_marks_installments_past_grace() {
        let harness = Harness::new();
        let (request, loan) = harness.disburse(&Parties::new()).await;
        let sweeper = harness.sweeper(SweeperConfig::default());
        let now = Utc::now() + Duration::days(40);

        let SweepOutcome::Completed(report) = sweeper.run_once(now).await.unwrap() else {
            panic!("sweep should not be skipped");
        };
        assert_eq!(report.loans_updated, 1);
        assert_eq!(report.installments_marked, 1);
        assert_eq!(report.newly_overdue_loans, vec![loan.id]);

        let stored = harness.repayments().get_loan(loan.id).await.unwrap();
        assert_eq!(stored.overdue_installments, 1);
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::PaymentOverdue);

        let SweepOutcome::Completed(again) = sweeper.run_once(now).await.unwrap() else {
            panic!("sweep should not be skipped");
        };
        assert_eq!(again.loans_updated, 0);
        assert_eq!(again.installments_marked, 0);
        assert!(again.newly_overdue_loans.is_empty());
        let stored = harness.repayments().get_loan(loan.id).await.unwrap();
        assert_eq!(stored.overdue_installments, 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_paid_installments_alone() {
        let harness = Harness::new();
        let (request, loan) = harness.disburse(&Parties::new()).await;
        harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-1", EMI, 1))
            .await
            .unwrap();

        let sweeper = harness.sweeper(SweeperConfig::default());
        let SweepOutcome::Completed(report) = sweeper.run_once(Utc::now() + Duration::days(40)).await.unwrap()
        else {
            panic!("sweep should not be skipped");
        };

        assert_eq!(report.installments_marked, 0);
        let installments = harness.repayments().installments(loan.id).await.unwrap();
        assert_eq!(installments[0].status, InstallmentStatus::Paid);
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::AmountDisbursed);
    }

    #[tokio::test]
    async fn test_paying_overdue_clears_request() {
        let harness = Harness::new();
        let (request, loan) = harness.disburse(&Parties::new()).await;
        harness
            .sweeper(SweeperConfig::default())
            .run_once(Utc::now() + Duration::days(40))
            .await
            .unwrap();

        let outcome = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-CATCHUP", EMI, 1))
            .await
            .unwrap();

        assert_eq!(outcome.application().loan.overdue_installments, 0);
        let request = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::AmountDisbursed);
    }

    #[tokio::test]
    async fn test_late_fee_raises_amount_due() {
        let harness = Harness::new();
        let (_, loan) = harness.disburse(&Parties::new()).await;
        harness
            .sweeper(sweep_config(dec!(100)))
            .run_once(Utc::now() + Duration::days(40))
            .await
            .unwrap();

        let result = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-OLD", EMI, 1))
            .await;
        assert!(matches!(
            result,
            Err(LendingError::AmountMismatch { expected, .. }) if expected == dec!(4098.20)
        ));

        let outcome = harness
            .reconciler
            .apply_payment(confirmation(&loan, "TXN-FEE", dec!(4098.20), 1))
            .await
            .unwrap();
        assert_eq!(outcome.application().payments[0].amount, dec!(4098.20));
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let harness = Harness::new();
        harness.disburse(&Parties::new()).await;
        let sweeper = harness.sweeper(SweeperConfig::default());
        let now = Utc::now() + Duration::days(40);

        // Hold the ledger so the first sweep parks inside its transaction
        let held = harness.repayments().begin().await.unwrap();
        let first = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run_once(now).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = sweeper.run_once(now).await.unwrap();
        assert_eq!(second, SweepOutcome::Skipped);

        drop(held);
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, SweepOutcome::Completed(report) if report.installments_marked == 1));
    }
}

// ============================================================================
// Checkout
// ============================================================================

mod checkout_tests {
    use super::*;

    fn callback(merchant_transaction_id: &str, code: &str, state: &str, paise: i64) -> String {
        BASE64.encode(
            json!({
                "success": code == "PAYMENT_SUCCESS",
                "code": code,
                "data": {
                    "merchantTransactionId": merchant_transaction_id,
                    "transactionId": format!("GW-{}", merchant_transaction_id),
                    "amount": paise,
                    "state": state,
                    "paymentInstrument": { "type": "UPI" }
                }
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_order_amount_is_recomputed() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (_, loan) = harness.disburse(&parties).await;
        let checkout = harness.checkout(gateway());
        let first = harness.repayments().installments(loan.id).await.unwrap()[0].clone();

        let result = checkout
            .create_order(
                &parties.customer,
                CreateOrder {
                    loan_id: loan.id,
                    installment_id: first.id,
                    installment_count: 2,
                    claimed_amount: EMI,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(LendingError::AmountMismatch { expected, .. }) if expected == EMI * dec!(2)
        ));
    }

    #[tokio::test]
    async fn test_order_must_start_at_earliest_installment() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (_, loan) = harness.disburse(&parties).await;
        let checkout = harness.checkout(gateway());
        let second = harness.repayments().installments(loan.id).await.unwrap()[1].clone();

        let result = checkout
            .create_order(
                &parties.customer,
                CreateOrder {
                    loan_id: loan.id,
                    installment_id: second.id,
                    installment_count: 1,
                    claimed_amount: EMI,
                },
            )
            .await;
        assert!(matches!(result, Err(LendingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stranger_cannot_open_order() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (_, loan) = harness.disburse(&parties).await;
        let checkout = harness.checkout(gateway());
        let first = harness.repayments().installments(loan.id).await.unwrap()[0].clone();

        let stranger = Parties::new().customer;
        let result = checkout
            .create_order(
                &stranger,
                CreateOrder {
                    loan_id: loan.id,
                    installment_id: first.id,
                    installment_count: 1,
                    claimed_amount: EMI,
                },
            )
            .await;
        assert!(matches!(result, Err(LendingError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn test_confirmed_callback_applies_once() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (_, loan) = harness.disburse(&parties).await;
        let gateway = gateway();
        let checkout = harness.checkout(gateway.clone());
        let first = harness.repayments().installments(loan.id).await.unwrap()[0].clone();

        let created = checkout
            .create_order(
                &parties.customer,
                CreateOrder {
                    loan_id: loan.id,
                    installment_id: first.id,
                    installment_count: 1,
                    claimed_amount: EMI,
                },
            )
            .await
            .unwrap();
        assert!(gateway
            .verify(&created.gateway_request.payload, &created.gateway_request.signature)
            .is_ok());

        let mt = created.order.merchant_transaction_id.clone();
        let payload = callback(&mt, "PAYMENT_SUCCESS", "COMPLETED", 399_820);
        let signature = gateway.sign(&payload);

        let outcome = checkout.handle_callback(&payload, &signature).await.unwrap();
        assert!(matches!(
            outcome,
            CallbackOutcome::Payment { outcome: ApplyOutcome::Applied(_), .. }
        ));

        let replay = checkout.handle_callback(&payload, &signature).await.unwrap();
        assert!(matches!(
            replay,
            CallbackOutcome::Payment { outcome: ApplyOutcome::AlreadyProcessed(_), .. }
        ));

        let payments = harness.store.all_payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].external_reference, format!("GW-{}", mt));

        let order = harness.store.order_by_merchant_transaction(&mt).await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.gateway_transaction_id, Some(format!("GW-{}", mt)));
    }

    #[tokio::test]
    async fn test_order_priced_before_late_fee_is_held_for_review() {
        for count in [1u32, 2] {
            let harness = Harness::new();
            let parties = Parties::new();
            let (_, loan) = harness.disburse(&parties).await;
            let gateway = gateway();
            let checkout = harness.checkout(gateway.clone());
            let first = harness.repayments().installments(loan.id).await.unwrap()[0].clone();
            let priced = EMI * rust_decimal::Decimal::from(count);

            let created = checkout
                .create_order(
                    &parties.customer,
                    CreateOrder {
                        loan_id: loan.id,
                        installment_id: first.id,
                        installment_count: count,
                        claimed_amount: priced,
                    },
                )
                .await
                .unwrap();

            harness
                .sweeper(sweep_config(dec!(100)))
                .run_once(Utc::now() + Duration::days(40))
                .await
                .unwrap();

            let mt = created.order.merchant_transaction_id.clone();
            let paise = i64::from(count) * 399_820;
            let payload = callback(&mt, "PAYMENT_SUCCESS", "COMPLETED", paise);
            let signature = gateway.sign(&payload);

            let outcome = checkout.handle_callback(&payload, &signature).await.unwrap();
            assert!(
                matches!(outcome, CallbackOutcome::HeldForReview { confirmed, .. } if confirmed == priced),
                "{:?}",
                outcome
            );

            let replay = checkout.handle_callback(&payload, &signature).await.unwrap();
            assert!(matches!(replay, CallbackOutcome::HeldForReview { .. }));

            assert!(harness.store.all_payments().await.is_empty());
            let order = harness.store.order_by_merchant_transaction(&mt).await.unwrap();
            assert_eq!(order.status, OrderStatus::Review);
            assert_eq!(order.gateway_transaction_id, Some(format!("GW-{}", mt)));
            let stored = harness.repayments().get_loan(loan.id).await.unwrap();
            assert_eq!(stored.paid_installments, 0);
        }
    }

    #[tokio::test]
    async fn test_tampered_callback_writes_nothing() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (_, loan) = harness.disburse(&parties).await;
        let gateway = gateway();
        let checkout = harness.checkout(gateway.clone());
        let first = harness.repayments().installments(loan.id).await.unwrap()[0].clone();

        let created = checkout
            .create_order(
                &parties.customer,
                CreateOrder {
                    loan_id: loan.id,
                    installment_id: first.id,
                    installment_count: 1,
                    claimed_amount: EMI,
                },
            )
            .await
            .unwrap();

        let mt = created.order.merchant_transaction_id;
        let genuine = callback(&mt, "PAYMENT_SUCCESS", "COMPLETED", 399_820);
        let signature = gateway.sign(&genuine);
        let forged = callback(&mt, "PAYMENT_SUCCESS", "COMPLETED", 100);

        let result = checkout.handle_callback(&forged, &signature).await;
        assert!(matches!(result, Err(LendingError::SignatureInvalid(_))));
        assert!(harness.store.all_payments().await.is_empty());

        let order = harness.store.order_by_merchant_transaction(&mt).await.unwrap();
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[tokio::test]
    async fn test_failed_callback_marks_order_failed() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (_, loan) = harness.disburse(&parties).await;
        let gateway = gateway();
        let checkout = harness.checkout(gateway.clone());
        let first = harness.repayments().installments(loan.id).await.unwrap()[0].clone();

        let created = checkout
            .create_order(
                &parties.customer,
                CreateOrder {
                    loan_id: loan.id,
                    installment_id: first.id,
                    installment_count: 1,
                    claimed_amount: EMI,
                },
            )
            .await
            .unwrap();

        let mt = created.order.merchant_transaction_id;
        let payload = callback(&mt, "PAYMENT_ERROR", "FAILED", 399_820);
        let outcome = checkout.handle_callback(&payload, &gateway.sign(&payload)).await.unwrap();

        assert!(matches!(outcome, CallbackOutcome::OrderFailed { ref code, .. } if code == "PAYMENT_ERROR"));
        let order = harness.store.order_by_merchant_transaction(&mt).await.unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(harness.store.all_payments().await.is_empty());
    }
}
