pub mod cancel;
pub mod config;
pub mod scan;
pub mod serve;
pub mod status;
