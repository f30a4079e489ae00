//! System CA trust store: per-OS layout lookup, prior-state derivation and
//! reconciliation of trusted certificates.

pub mod locator;
pub mod prior;
pub mod reconciler;
