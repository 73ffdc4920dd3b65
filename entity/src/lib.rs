pub mod data;
pub mod portfolio;
pub mod signal;
