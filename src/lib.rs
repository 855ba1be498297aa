pub mod config;
pub mod logger;
pub mod machine;
pub mod phase1;
pub mod system;
