pub mod palette;
pub mod waterfall;
