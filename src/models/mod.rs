pub mod event;
pub mod input;
pub mod message;
pub mod task;
