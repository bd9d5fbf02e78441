pub mod app;
pub mod cache;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod curation_store;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod geo;
pub mod matrix;
pub mod output;
pub mod soft;
pub mod store;
