pub mod campaign;
pub mod config;
pub mod contribution;
pub mod entry;
pub mod error;
pub mod history;
pub mod reconcile;
pub mod types;
pub mod utils;

pub use error::ReconcileError;
pub use reconcile::{ReconcileRequest, Reconciler, Reconciliation};
