//! Scheduled feed ingestion.
//!
//! A [`scheduler::Scheduler`] runs one update loop per configured source. Each
//! loop drives a [`pipeline::Pipeline`] cycle: fetch and parse the source,
//! optionally summarize every item, then persist the items one object per
//! item through an [`storage::ItemStore`].

pub mod cache;
pub mod config;
pub mod content;
pub mod feed;
pub mod item;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod util;
