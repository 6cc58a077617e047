//! Data models

pub mod report;
