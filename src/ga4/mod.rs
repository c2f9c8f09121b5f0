//! GA4 Analytics Data API integration.

pub mod client;

pub use client::{Ga4Client, ReportClient};
