pub mod command;
pub mod frame;
