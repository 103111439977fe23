pub mod ban_protocol_errors;
pub mod broadcast_errors;
pub mod chess_service_errors;
pub mod clock_service_errors;
pub mod game_service_errors;
