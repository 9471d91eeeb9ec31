pub mod problems;
pub mod redis;
pub mod types;
