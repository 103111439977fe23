pub mod actions;
pub mod connection;
pub mod events;
pub mod game;
pub mod move_record;
pub mod move_request;
pub mod pgn;
