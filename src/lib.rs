//! # Open Music Lavalink
//!
//! Client-side orchestration for a pool of Lavalink audio nodes: node
//! selection by region and load, per-guild players that survive node loss,
//! local playlist import and a persistent query cache.

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod playlist;
