//! Business services: the payment orchestrator, webhook management, and
//! reconciliation

pub mod payment_service;
pub mod reconciliation_service;
pub mod state_machine;
pub mod webhook_service;

pub use payment_service::{Completed, PaymentOrchestrator};
pub use reconciliation_service::ReconciliationSummary;
pub use webhook_service::WebhookService;
