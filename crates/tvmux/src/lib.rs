//! # tvmux
//!
//! IPTV aggregation core: ingests stream sources (M3U playlists, Xtream
//! Codes APIs, manual channel lists) and guide sources (XMLTV documents,
//! Xtream APIs), then runs a per-proxy pipeline that merges, maps, filters
//! and renders the result as one M3U playlist and one XMLTV document,
//! published atomically.

pub mod config;
pub mod converters;
pub mod errors;
pub mod ingestor;
pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod sources;
pub mod utils;
pub mod xtream;
