//! Workflow engine tests against the in-memory store

mod support;

use chrono::{NaiveDate, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use core_kernel::{Currency, PartyId, Rate};

use domain_lending::ports::mock::{MockLendingStore, MockNotificationQueue};
use domain_lending::{
    ActionEffect, ActionId, ActionInput, Actor, AmortizationCalculator, Channel, ContactDetails,
    EventBus, Guard, LendingError, LendingEvent, Loan, LoanRequest, LoanStatus, NewLoanRequest,
    OfferTerms, RepaymentPort, RequestStatus, Role, WorkflowEngine, WorkflowPolicy,
};

use support::{bank, contact, Harness, Parties, DISTRICT};

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_lifecycle_originates_loan() {
        let harness = Harness::new();
        let parties = Parties::new();

        let (request, loan) = harness.disburse(&parties).await;

        assert_eq!(request.status, RequestStatus::AmountDisbursed);
        assert_eq!(loan.request_id, request.id);
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.emi_amount, dec!(3998.20));
        assert_eq!(loan.remaining_balance, dec!(45000));

        let installments = harness.repayments().installments(loan.id).await.unwrap();
        assert_eq!(installments.len(), 12);
        assert_eq!(installments[0].due_date, loan.first_payment_date);

        let history = harness.engine.history(request.id).await.unwrap();
        assert_eq!(history.len(), 11);
        assert_eq!(history[0].action, ActionId::SubmitRequest);
        assert_eq!(history[0].prior_status, None);
        assert_eq!(history.last().unwrap().action, ActionId::DisburseAmount);
        for pair in history.windows(2) {
            assert_eq!(pair[1].prior_status, Some(pair[0].next_status));
        }
    }

    #[tokio::test]
    async fn test_offer_recorded_only_once_made() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;
        assert!(request.offer.is_none());

        let request = harness
            .act(&request, "make-offer", &parties.admin, ActionInput::offer(dec!(40000), 6, dec!(18)))
            .await;

        assert_eq!(request.status, RequestStatus::OfferMade);
        assert_eq!(
            request.offer,
            Some(OfferTerms { amount: dec!(40000), tenure_months: 6, annual_rate: dec!(18) })
        );
    }

    #[tokio::test]
    async fn test_declined_offer_can_be_reoffered() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;
        let request = harness
            .act(&request, "make-offer", &parties.admin, ActionInput::offer(dec!(40000), 6, dec!(18)))
            .await;
        let request = harness.act(&request, "decline-offer", &parties.customer, ActionInput::default()).await;
        let request = harness
            .act(&request, "make-offer", &parties.admin, ActionInput::offer(dec!(42000), 9, dec!(16)))
            .await;

        assert_eq!(request.status, RequestStatus::OfferMade);
        assert_eq!(request.offer.unwrap().amount, dec!(42000));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_terminal() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;
        let request = harness.act(&request, "cancel-request", &parties.customer, ActionInput::default()).await;

        let available = harness.engine.available_actions(request.id, &parties.admin).await.unwrap();
        assert!(available.is_empty());

        let result = harness
            .engine
            .apply(request.id, "start-review", &parties.admin, ActionInput::default())
            .await;
        assert!(matches!(result, Err(LendingError::UnknownAction { .. })));
    }

    #[tokio::test]
    async fn test_disbursal_honours_first_payment_date() {
        let harness = Harness::new();
        let parties = Parties::new();
        let (request, loan) = harness.disburse(&parties).await;
        assert_eq!(request.status, RequestStatus::AmountDisbursed);
        assert!(loan.first_payment_date > loan.disbursed_on);
    }
}

// ============================================================================
// Policy violations
// ============================================================================

mod policy_tests {
    use super::*;

    #[tokio::test]
    async fn test_customer_make_offer_on_pending_is_unknown_action() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        // The owner and a stranger get the same answer
        for actor in [parties.customer.clone(), Actor::customer(PartyId::new())] {
            let result = harness
                .engine
                .apply(request.id, "make-offer", &actor, ActionInput::offer(dec!(1000), 3, dec!(12)))
                .await;
            match result {
                Err(LendingError::UnknownAction { action, role, status }) => {
                    assert_eq!(action, "make-offer");
                    assert_eq!(role, Role::Customer);
                    assert_eq!(status, RequestStatus::Pending);
                }
                other => panic!("expected UnknownAction, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unparseable_action_is_unknown_action() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        let result = harness
            .engine
            .apply(request.id, "approve-everything", &parties.admin, ActionInput::default())
            .await;
        assert!(matches!(result, Err(LendingError::UnknownAction { .. })));
    }

    #[tokio::test]
    async fn test_guards_report_the_failing_predicate() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        let outsider_admin = Actor::admin(PartyId::new(), vec!["Thrissur".to_string()]);
        let result = harness
            .engine
            .apply(request.id, "start-review", &outsider_admin, ActionInput::default())
            .await;
        assert!(matches!(result, Err(LendingError::Forbidden { guard: Guard::District })));

        let request = harness
            .act(&request, "make-offer", &parties.admin, ActionInput::offer(dec!(40000), 6, dec!(18)))
            .await;
        let stranger = Actor::customer(PartyId::new());
        let result = harness
            .engine
            .apply(request.id, "accept-offer", &stranger, ActionInput::default())
            .await;
        assert!(matches!(result, Err(LendingError::Forbidden { guard: Guard::Ownership })));

        let request = harness.act(&request, "accept-offer", &parties.customer, ActionInput::default()).await;
        let request = harness
            .act(
                &request,
                "schedule-inspection",
                &parties.admin,
                ActionInput::inspection(parties.agent.id, Utc::now()),
            )
            .await;
        let other_agent = Actor::agent(PartyId::new());
        let result = harness
            .engine
            .apply(request.id, "start-inspection", &other_agent, ActionInput::default())
            .await;
        assert!(matches!(result, Err(LendingError::Forbidden { guard: Guard::Assignment })));
    }

    #[tokio::test]
    async fn test_make_offer_reports_missing_field() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        let mut input = ActionInput::offer(dec!(40000), 6, dec!(18));
        input.offer.as_mut().unwrap().tenure_months = None;
        let result = harness.engine.apply(request.id, "make-offer", &parties.admin, input).await;

        match result {
            Err(LendingError::MissingInput { action, field }) => {
                assert_eq!(action, "make-offer");
                assert_eq!(field, "tenure_months");
            }
            other => panic!("expected MissingInput, got {:?}", other),
        }
        let stored = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_make_offer_rejects_non_positive_terms() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        let result = harness
            .engine
            .apply(request.id, "make-offer", &parties.admin, ActionInput::offer(dec!(40000), 6, dec!(0)))
            .await;
        assert!(matches!(result, Err(LendingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_submit_requires_customer_role() {
        let harness = Harness::new();
        let parties = Parties::new();
        let result = harness
            .engine
            .submit(
                &parties.admin,
                NewLoanRequest {
                    customer_id: parties.admin.id,
                    requested_amount: dec!(1000),
                    currency: Currency::INR,
                    asset_descriptor: "ring".into(),
                    district: DISTRICT.into(),
                    contact: ContactDetails::default(),
                },
            )
            .await;
        assert!(matches!(result, Err(LendingError::UnknownAction { .. })));
    }

    #[tokio::test]
    async fn test_available_actions_show_blocking_guard() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        let mine = harness.engine.available_actions(request.id, &parties.admin).await.unwrap();
        let ids: Vec<_> = mine.iter().map(|a| a.action).collect();
        assert_eq!(ids, vec![ActionId::StartReview, ActionId::MakeOffer, ActionId::RejectRequest]);
        assert!(mine.iter().all(|a| a.is_available()));

        let outsider = Actor::admin(PartyId::new(), vec![]);
        let theirs = harness.engine.available_actions(request.id, &outsider).await.unwrap();
        assert!(theirs.iter().all(|a| a.blocked_by == Some(Guard::District)));
    }
}

// ============================================================================
// Side effects
// ============================================================================

mod side_effect_tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_failure_does_not_fail_transition() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        harness.queue.fail_enqueues(true);
        let outcome = harness
            .engine
            .apply(request.id, "make-offer", &parties.admin, ActionInput::offer(dec!(40000), 6, dec!(18)))
            .await
            .unwrap();

        assert_eq!(outcome.new_status, RequestStatus::OfferMade);
        let stored = harness.engine.current_state(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::OfferMade);
    }

    #[tokio::test]
    async fn test_missing_phone_skips_only_whatsapp() {
        let harness = Harness::new();
        let parties = Parties::new();
        let mut details = contact();
        details.phone = None;
        harness.submit(&parties.customer, details).await;

        let jobs = harness.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job.channel, Channel::Email);
        assert_eq!(jobs[0].job.template, "request_submitted");
    }

    #[tokio::test]
    async fn test_committed_transition_publishes_event() {
        let harness = Harness::new();
        let parties = Parties::new();
        let mut events = harness.events.subscribe();
        let request = harness.submit(&parties.customer, contact()).await;
        harness.act(&request, "start-review", &parties.admin, ActionInput::default()).await;

        assert!(matches!(events.recv().await.unwrap(), LendingEvent::RequestSubmitted { .. }));
        match events.recv().await.unwrap() {
            LendingEvent::Transitioned { action, prior_status, next_status, .. } => {
                assert_eq!(action, ActionId::StartReview);
                assert_eq!(prior_status, RequestStatus::Pending);
                assert_eq!(next_status, RequestStatus::UnderReview);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_actions_commit_once() {
        let harness = Harness::new();
        let parties = Parties::new();
        let request = harness.submit(&parties.customer, contact()).await;

        let (a, b) = tokio::join!(
            harness.engine.apply(request.id, "start-review", &parties.admin, ActionInput::default()),
            harness.engine.apply(request.id, "start-review", &parties.admin, ActionInput::default()),
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let history = harness.engine.history(request.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}

// ============================================================================
// Policy table as data
// ============================================================================

mod table_tests {
    use super::*;

    fn seeded_request(status: RequestStatus, customer: &Actor, agent: &Actor) -> LoanRequest {
        let mut request = LoanRequest::submit(
            NewLoanRequest {
                customer_id: customer.id,
                requested_amount: dec!(20000),
                currency: Currency::INR,
                asset_descriptor: "bangle".into(),
                district: DISTRICT.into(),
                contact: contact(),
            },
            Utc::now(),
        )
        .unwrap();
        request.status = status;
        request.offer = Some(OfferTerms { amount: dec!(20000), tenure_months: 6, annual_rate: dec!(12) });
        request.assigned_agent_id = Some(agent.id);
        request.bank_details = Some(bank());
        request
    }

    fn actor_for(role: Role, customer: &Actor, agent: &Actor) -> Actor {
        match role {
            Role::Customer => customer.clone(),
            Role::Agent => agent.clone(),
            Role::Admin => Actor::admin(PartyId::new(), vec![DISTRICT.into()]),
            Role::System => Actor::system(),
        }
    }

    fn full_input(agent: &Actor) -> ActionInput {
        let mut input = ActionInput::offer(dec!(20000), 6, dec!(12));
        input.agent_id = Some(agent.id);
        input.inspection_date = Some(Utc::now());
        input.bank_details = Some(bank());
        input
    }

    /// Every (status, role, action) triple either lands on the declared
    /// target or is refused as unknown
    #[tokio::test]
    async fn test_every_table_entry_reaches_its_target() {
        let policy = WorkflowPolicy;
        let customer = Actor::customer(PartyId::new());
        let agent = Actor::agent(PartyId::new());

        for status in RequestStatus::ALL {
            for role in Role::ALL {
                for id in ActionId::ALL {
                    let request = seeded_request(status, &customer, &agent);
                    let mut store = MockLendingStore::new().with_request(request.clone()).await;
                    if matches!(status, RequestStatus::AmountDisbursed | RequestStatus::PaymentOverdue) {
                        let schedule = AmortizationCalculator
                            .schedule(dec!(20000), Rate::annual_percent(dec!(12)), 6, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap())
                            .unwrap();
                        let (loan, installments) =
                            Loan::originate(request.id, Currency::INR, &schedule, Utc::now().date_naive(), Utc::now());
                        store = store.with_loan(loan, installments).await;
                    }
                    let engine = WorkflowEngine::new(
                        Arc::new(store.clone()),
                        Arc::new(MockNotificationQueue::new()),
                        EventBus::default(),
                    );
                    let actor = actor_for(role, &customer, &agent);

                    let declared = policy
                        .permitted_actions(status, role)
                        .into_iter()
                        .find(|a| a.id == id);
                    let result = engine.apply(request.id, id.as_str(), &actor, full_input(&agent)).await;

                    match declared {
                        Some(action) => {
                            let outcome = result.unwrap_or_else(|e| {
                                panic!("{} by {} from {} failed: {}", id, role, status, e)
                            });
                            assert_eq!(outcome.new_status, action.target);
                            assert_eq!(outcome.loan.is_some(), action.effect == ActionEffect::OriginateLoan);
                            if action.effect == ActionEffect::DefaultLoan {
                                let loan = store.loan_for_request(request.id).await.unwrap();
                                assert_eq!(loan.status, LoanStatus::Defaulted);
                            }
                        }
                        None => assert!(
                            matches!(result, Err(LendingError::UnknownAction { .. })),
                            "{} by {} from {} should be unknown",
                            id,
                            role,
                            status
                        ),
                    }
                }
            }
        }
    }
}
