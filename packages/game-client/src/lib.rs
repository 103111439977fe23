pub mod client;
pub mod clock;
pub mod config;
pub mod errors;
pub mod history;
pub mod scheduler;
pub mod sync;
pub mod transport;
