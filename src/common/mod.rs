pub mod types;
pub mod logging;
