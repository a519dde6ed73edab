pub mod accident;
pub mod api;
pub mod config;
pub mod error;
pub mod perception;
pub mod region;
pub mod schedule;
pub mod signal;
pub mod state;
pub mod storage;
