//! Billing Period & Charge Processing Engine
//!
//! This crate groups staff charges (rent, utilities, transport and other
//! obligations) into billing periods, generates prorated charges from
//! activity sources, drives each period through its lifecycle, and exports
//! Completed periods for payroll deduction.
//!
//! - [`calculation`]: proration, base rates, rounding and total validation
//! - [`models`]: billing periods, charges, exports and progress records
//! - [`engine`]: state machine, ledger, orchestrator, export builder
//! - [`store`] and [`sources`]: the collaborators the engine consumes
//! - [`api`]: the HTTP surface

#![warn(missing_docs)]

pub mod api;
pub mod calculation;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod sources;
pub mod store;
