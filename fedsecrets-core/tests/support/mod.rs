pub mod platform;
pub mod truncated;
