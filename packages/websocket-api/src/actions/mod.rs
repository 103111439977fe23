pub mod connect;
pub mod default;
pub mod disconnect;
