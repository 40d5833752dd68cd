//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Repository Pattern
//! Each repository owns a clone of the pool and exposes intention-revealing
//! async methods. Multi-row writes always run inside one transaction.
//!
//! ## Available Repositories
//!
//! - [`credential::CredentialRepository`] - Current bearer credential
//! - [`api_log::ApiLogRepository`] - Outbound call audit log
//! - [`delivery_point::DeliveryPointRepository`] - Delivery point mirror
//! - [`order::OrderRepository`] - Registered order graphs
//! - [`print_job::PrintJobRepository`] - Print job cache

pub mod api_log;
pub mod credential;
pub mod delivery_point;
pub mod order;
pub mod print_job;
