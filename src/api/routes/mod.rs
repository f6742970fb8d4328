//! API route handlers

pub mod auto_trading;
pub mod references;
pub mod status;
pub mod trades;
