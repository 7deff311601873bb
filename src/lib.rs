pub mod cli;
pub mod config;
pub mod events;
pub mod task_manager;
pub mod workload;
