// Module for organizing coverage tests
mod completion;
mod config;
mod error;
mod timer;
mod transport;
mod types;
