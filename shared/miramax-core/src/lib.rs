//! Miramax Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait all microservices must implement
//! - Common domain types (Role, Actor, ClientCode, Dni)
//! - Error handling utilities
//! - Configuration management

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{MiramaxError, Result};
pub use service::{HealthStatus, MicroserviceRuntime, MiramaxService, ReadinessStatus};
