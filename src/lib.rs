pub mod cli;
pub mod collaborators;
pub mod config;
pub mod orchestration;
pub mod shared;
