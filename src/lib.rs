//! PixelForge generation service
//!
//! Backend for an AI image generation product: admits generation jobs against
//! a per-user credit ledger, drives them through an external image provider,
//! stores the produced artifacts under per-user quotas, and aggregates daily
//! usage.

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod middleware;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod usage;
pub mod users;

pub use error::{AppError, Result};

use std::sync::Arc;

use db::Db;
use orchestrator::Orchestrator;
use users::UserService;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: config::Settings,
    pub db: Arc<Db>,
    pub orchestrator: Arc<Orchestrator>,
    pub users: UserService,
}
