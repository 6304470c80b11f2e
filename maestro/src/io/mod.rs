//! Side-effecting operations: config files, HTTP, the filesystem sandbox and
//! console output.

pub mod config;
pub mod console;
pub mod file_tree;
pub mod gateway;
pub mod prompt;
pub mod sandbox;
pub mod transport;
