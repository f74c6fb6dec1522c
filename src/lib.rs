//! Background relay tasks with a shared, bounded live console.
//!
//! A [`JobManager`](manager::task_manager::JobManager) runs one send loop per
//! task on its own thread. Loops report progress into a
//! [`LogSink`](logging::sink::LogSink), which any number of viewers follow
//! through a [`StreamPublisher`](logging::stream::StreamPublisher).

pub mod app;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod manager;
pub mod models;
pub mod worker;
