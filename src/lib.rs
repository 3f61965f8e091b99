//! finance-pipeline - SMS change-data-capture processor
//!
//! Consumes change events from the SMS table, turns each message into a
//! categorized transaction record, and routes deliveries that exhaust their
//! retry budget to a dead-letter sink. A small authorized HTTP API exposes
//! transaction listing, category correction and monthly period records.

pub mod api;
pub mod auth;
pub mod capability;
pub mod config;
pub mod dlq;
pub mod feed;
pub mod model;
pub mod processor;
pub mod services;
pub mod standalone;
pub mod storage;
pub mod utils;
