pub mod blueprint;
pub mod catalog;
pub mod compound;
pub mod context;
pub mod engine;
pub mod error;
pub mod manager;
pub mod runner;
pub mod task;
pub mod workflow;
