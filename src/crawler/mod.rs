//! Crawler module for page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Page loads through leased renderer sessions, with image capture
//! - The worker loop that takes a task from queue to record log
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod worker;

pub use coordinator::{Coordinator, CrawlReport};
pub use fetcher::{CapturedImage, Fetcher, RenderedContent};
