//! Background RSS updater: polls subscribed feeds, stores new articles and
//! prunes old ones.

pub mod config;
pub mod feed;
pub mod service;
pub mod storage;
pub mod util;
