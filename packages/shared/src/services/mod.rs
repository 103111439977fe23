pub mod action_handler;
pub mod ban_protocol;
pub mod broadcaster;
pub mod chess_service;
pub mod clock_service;
pub mod errors;
pub mod game_service;
pub mod time_provider;
pub mod websocket_service;
