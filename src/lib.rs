//! Caching and normalization layer for the Rally issue-tracking API.

pub mod cache;
pub mod config;
pub mod logging;
pub mod rally;
