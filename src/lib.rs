pub mod audit;
pub mod builder;
pub mod cascade;
pub mod engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod policy;
pub mod quorum;
pub mod state_machine;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod utils;
