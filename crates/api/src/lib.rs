//! HTTP control surface for the batch coordinator.

pub mod app;
pub mod config;
