pub mod config;
pub mod judge;
pub mod leaderboard;
pub mod problems;
pub mod queue;
pub mod sandbox;
pub mod service;
pub mod worker;
