//! cube: a small container orchestrator.
//!
//! A [`manager::Manager`] takes task events from clients, places each task on
//! one worker from a fixed roster and pushes the event to it over HTTP. Every
//! [`worker::Worker`] drains its own queue, drives a container
//! [`tasks::runtime::Runtime`] and records what it observed. The manager
//! polls the workers to rebuild its view of task state.
//!
//! All state lives in memory and is rebuilt from scratch on restart.

pub mod api;
pub mod config;
pub mod logging;
pub mod manager;
pub mod scheduler;
pub mod tasks;
pub mod worker;
