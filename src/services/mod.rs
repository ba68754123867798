pub mod client;
pub mod credentials;
pub mod heuristic;
pub mod registry;
pub mod session;
