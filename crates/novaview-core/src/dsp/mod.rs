pub mod autoscale;
pub mod spectrum;
