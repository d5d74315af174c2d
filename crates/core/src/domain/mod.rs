pub mod contract;
pub mod deal;
