//! Chunked conversion of Substack exports into WordPress eXtended RSS.
//!
//! A [`converter::Converter`] turns an ordered [`source::SourceCollection`]
//! into one WXR document per job, a bounded batch per call, persisting enough
//! state through a [`store::JobStore`] to report progress and resume.

pub mod config;
pub mod converter;
pub mod endpoint;
pub mod error;
pub mod mapping;
pub mod poller;
pub mod source;
pub mod state_machine;
pub mod store;
pub mod wxr;
