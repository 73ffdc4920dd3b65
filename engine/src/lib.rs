pub mod logging;
pub mod notify;
pub mod pacing;
pub mod rebalance;
pub mod risk;
pub mod scoring;
pub mod signal;

#[cfg(test)]
mod testing;
