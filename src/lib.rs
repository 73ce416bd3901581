pub mod config;
pub mod db;
pub mod errors;
pub mod etl;
pub mod input;
pub mod merge;
pub mod orchestrator;
pub mod output;
pub mod reference;
pub mod resolution;
pub mod types;
