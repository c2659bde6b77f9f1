//! Invoicer Billing - Subscription billing for a multi-tenant invoicing service.
//!
//! Tenants subscribe to plans and pay by M-Pesa STK push or card. This crate
//! owns the payment ledger, the subscription state machine, the renewal
//! scheduler and invoice finalization, with gateway callbacks served over HTTP.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
