pub mod process;
pub mod replay;
