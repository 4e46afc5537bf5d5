pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod event;
pub mod intake;
pub mod pipeline;
pub mod sink;
pub mod storage;
pub mod tracker;
pub mod transport;
pub mod web;
