#![forbid(unsafe_code)]

//! Building blocks for archiving a user's liked coubs: listing fetch and
//! cache, quality selection, and the per-item download/loop/mux pipeline.

pub mod config;
pub mod download;
pub mod listing;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod transcoder;
