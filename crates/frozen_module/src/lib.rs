//! Ahead-of-time freezer for compiled Python code
//!
//! Turns code objects into C source holding byte-exact static copies of every
//! object they reference, so a host interpreter can run them without
//! unmarshalling anything at startup.

pub mod c_literal;
pub mod code_generator;
pub mod config;
pub mod dirs;
pub mod error;
pub mod hashing;
pub mod layout;
pub mod marshal;
pub mod module_registry;
pub mod orchestrator;
pub mod serializer;
pub mod target_runtime;
pub mod types;
pub mod value;
