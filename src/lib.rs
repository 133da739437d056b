//! Invoice extractor: attachment → canonical invoice record → message broker.

pub mod api;
pub mod attachments;
pub mod broker;
pub mod config;
pub mod error;
pub mod invoice;
pub mod llm;
pub mod pipeline;
