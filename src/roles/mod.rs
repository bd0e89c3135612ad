pub mod aggregator;
pub mod client;
pub mod generator;
pub mod publisher;
