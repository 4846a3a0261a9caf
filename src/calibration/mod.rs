pub mod leaderboard;
pub mod metrics;
