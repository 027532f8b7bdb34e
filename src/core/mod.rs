pub mod browser;
pub mod harness;
pub mod invoker;
pub mod memory;
pub mod paths;
pub mod proactive;
pub mod processor;
pub mod queue;
pub mod repository;
pub mod router;
pub mod settings;
pub mod skills;
pub mod terminal;
pub mod tooling;
pub mod types;
