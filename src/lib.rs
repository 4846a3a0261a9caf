//! CalibratedAI: ranks language models by how well calibrated their
//! probability forecasts are on resolved Polymarket questions.

pub mod api;
pub mod calibration;
pub mod config;
pub mod data;
pub mod estimation;
pub mod monitoring;
pub mod refresh;
pub mod storage;
