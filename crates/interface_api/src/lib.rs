//! HTTP API Layer
//!
//! This crate provides the REST API for the lending core using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: Request handlers for workflow, loans, payments and health
//! - **Middleware**: Authentication, tracing, audit logging
//! - **DTOs**: Request/Response data transfer objects
//! - **Error Handling**: Consistent error responses
//!
//! Handlers hold no business rules: every decision is made by the
//! `domain_lending` services kept in [`AppState`].
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, Adapters, AppState};
//!
//! let state = AppState::new(config, adapters);
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use core_kernel::HealthCheckable;
use domain_lending::{
    CheckoutService, EventBus, GatewayAdapter, LoanRequestPort, NotificationQueue, OverdueSweeper,
    PaymentOrderPort, PaymentReconciler, RepaymentPort, WorkflowEngine,
};

use crate::config::ApiConfig;
use crate::handlers::{health, loans, payments, requests};
use crate::middleware::{audit_middleware, auth_middleware};

/// Storage adapters the services are built on
#[derive(Clone)]
pub struct Adapters {
    pub requests: Arc<dyn LoanRequestPort>,
    pub repayments: Arc<dyn RepaymentPort>,
    pub orders: Arc<dyn PaymentOrderPort>,
    pub notifications: Arc<dyn NotificationQueue>,
    /// Probed by the readiness endpoint
    pub health_checks: Vec<Arc<dyn HealthCheckable>>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub engine: Arc<WorkflowEngine>,
    pub reconciler: Arc<PaymentReconciler>,
    pub checkout: Arc<CheckoutService>,
    pub repayments: Arc<dyn RepaymentPort>,
    pub health_checks: Vec<Arc<dyn HealthCheckable>>,
    pub events: EventBus,
}

impl AppState {
    /// Wires the domain services over the given adapters
    pub fn new(config: ApiConfig, adapters: Adapters) -> Self {
        let events = EventBus::default();
        let engine = Arc::new(
            WorkflowEngine::new(adapters.requests.clone(), adapters.notifications, events.clone())
                .with_conflict_retry_attempts(config.conflict_retry_attempts),
        );
        let reconciler = Arc::new(
            PaymentReconciler::new(adapters.repayments.clone(), engine.clone(), events.clone())
                .with_conflict_retry_attempts(config.conflict_retry_attempts),
        );
        let checkout = Arc::new(CheckoutService::new(
            adapters.requests,
            adapters.repayments.clone(),
            adapters.orders,
            GatewayAdapter::new(config.gateway_credentials()),
            reconciler.clone(),
        ));

        Self {
            config,
            engine,
            reconciler,
            checkout,
            repayments: adapters.repayments,
            health_checks: adapters.health_checks,
            events,
        }
    }

    /// Builds the overdue sweeper sharing this state's engine and event bus
    pub fn overdue_sweeper(&self) -> OverdueSweeper {
        OverdueSweeper::new(
            self.repayments.clone(),
            self.engine.clone(),
            self.events.clone(),
            self.config.sweeper_config(),
        )
    }
}

/// Creates the main API router
///
/// # Arguments
///
/// * `state` - Services and configuration shared by every handler
///
/// # Returns
///
/// Configured Axum router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required); the webhook authenticates by signature
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/webhooks/gateway", post(payments::gateway_callback));

    // Workflow routes
    let request_routes = Router::new()
        .route("/", post(requests::submit_request).get(requests::list_requests))
        .route("/:id", get(requests::get_request))
        .route("/:id/actions", get(requests::available_actions))
        .route("/:id/actions/:action", post(requests::apply_action))
        .route("/:id/history", get(requests::get_history))
        .route("/:id/loan", get(loans::get_loan_for_request));

    // Loan routes
    let loan_routes = Router::new()
        .route("/:id/schedule", get(loans::get_schedule))
        .route(
            "/:id/payments",
            get(loans::list_payments).post(payments::record_manual_payment),
        )
        .route("/:id/orders", post(payments::create_order));

    // Protected API routes
    let api_routes = Router::new()
        .nest("/requests", request_routes)
        .nest("/loans", loan_routes)
        .layer(axum_middleware::from_fn(audit_middleware))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
