use chess::{BitBoard, Board, BoardStatus, ChessMove, MoveGen, Piece, Square, EMPTY};
use std::str::FromStr;

use crate::{
    models::{
        actions::LegalMoveMap,
        game::{normalize_fen, BannedMove, Color, EndReason, GameResult},
        pgn::MoveText,
    },
    services::errors::chess_service_errors::ChessServiceError,
};

/// A board plus the move counters the `chess` crate does not track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    board: Board,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Position {
    pub fn from_fen(fen: &str) -> Result<Self, ChessServiceError> {
        let fen = normalize_fen(fen);
        let fields: Vec<&str> = fen.split(' ').collect();
        if fields.len() < 4 {
            return Err(ChessServiceError::InvalidPosition(format!(
                "Invalid FEN: {}",
                fen
            )));
        }

        let board = Board::from_str(&fields[..4].join(" "))
            .map_err(|e| ChessServiceError::InvalidPosition(format!("Invalid FEN: {}", e)))?;
        let counter = |index: usize, default: u32| -> Result<u32, ChessServiceError> {
            match fields.get(index) {
                Some(value) => value.parse().map_err(|_| {
                    ChessServiceError::InvalidPosition(format!("Invalid move counter: {}", value))
                }),
                None => Ok(default),
            }
        };

        Ok(Position {
            board,
            halfmove_clock: counter(4, 0)?,
            fullmove_number: counter(5, 1)?.max(1),
        })
    }

    pub fn fen(&self) -> String {
        let board = self.board.to_string();
        let placement: Vec<&str> = board.split_whitespace().take(4).collect();
        format!(
            "{} {} {}",
            placement.join(" "),
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move().into()
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    pub fn is_check(&self) -> bool {
        *self.board.checkers() != EMPTY
    }

    /// Zobrist key of the position; equal keys mean a repeated position.
    pub fn key(&self) -> u64 {
        self.board.get_hash()
    }

    pub fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.board).collect()
    }

    /// Legal moves with the banned pair removed. A ban covers every promotion
    /// choice on the same squares.
    pub fn legal_moves_excluding(&self, ban: Option<&BannedMove>) -> Vec<ChessMove> {
        self.legal_moves()
            .into_iter()
            .filter(|mv| ban.map_or(true, |ban| !matches_ban(mv, ban)))
            .collect()
    }

    fn is_capture(&self, mv: ChessMove) -> bool {
        if self.board.piece_on(mv.get_dest()).is_some() {
            return true;
        }
        // en passant lands on an empty square
        self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            && mv.get_source().get_file() != mv.get_dest().get_file()
    }

    /// Plays a move already known to be legal.
    pub fn play(&self, mv: ChessMove) -> Position {
        let resets_clock =
            self.board.piece_on(mv.get_source()) == Some(Piece::Pawn) || self.is_capture(mv);
        let black_moved = self.board.side_to_move() == chess::Color::Black;

        Position {
            board: self.board.make_move_new(mv),
            halfmove_clock: if resets_clock {
                0
            } else {
                self.halfmove_clock + 1
            },
            fullmove_number: if black_moved {
                self.fullmove_number + 1
            } else {
                self.fullmove_number
            },
        }
    }

    /// Standard algebraic notation for a legal move in this position.
    pub fn san(&self, mv: ChessMove) -> String {
        let source = mv.get_source();
        let dest = mv.get_dest();
        let piece = self.board.piece_on(source).unwrap_or(Piece::Pawn);

        let mut san = if piece == Piece::King && file_distance(source, dest) == 2 {
            if dest.get_file().to_index() > source.get_file().to_index() {
                "O-O".to_string()
            } else {
                "O-O-O".to_string()
            }
        } else if piece == Piece::Pawn {
            let mut san = String::new();
            if self.is_capture(mv) {
                san.push(file_char(source));
                san.push('x');
            }
            san.push_str(&dest.to_string());
            if let Some(promotion) = mv.get_promotion() {
                san.push('=');
                san.push(piece_letter(promotion));
            }
            san
        } else {
            let mut san = String::new();
            san.push(piece_letter(piece));
            san.push_str(&self.disambiguation(mv, piece));
            if self.is_capture(mv) {
                san.push('x');
            }
            san.push_str(&dest.to_string());
            san
        };

        let after = self.board.make_move_new(mv);
        match after.status() {
            BoardStatus::Checkmate => san.push('#'),
            _ if *after.checkers() != EMPTY => san.push('+'),
            _ => {}
        }
        san
    }

    fn disambiguation(&self, mv: ChessMove, piece: Piece) -> String {
        let source = mv.get_source();
        let rivals: Vec<Square> = self
            .legal_moves()
            .into_iter()
            .filter(|other| {
                other.get_dest() == mv.get_dest()
                    && other.get_source() != source
                    && self.board.piece_on(other.get_source()) == Some(piece)
            })
            .map(|other| other.get_source())
            .collect();

        if rivals.is_empty() {
            String::new()
        } else if rivals.iter().all(|sq| sq.get_file() != source.get_file()) {
            file_char(source).to_string()
        } else if rivals.iter().all(|sq| sq.get_rank() != source.get_rank()) {
            rank_char(source).to_string()
        } else {
            source.to_string()
        }
    }

    /// Finds the legal move written as `san`, ignoring check and annotation
    /// suffixes.
    pub fn parse_san(&self, san: &str) -> Option<ChessMove> {
        let normalized = san.replace('0', "O");
        let wanted = strip_san_suffix(&normalized);
        self.legal_moves()
            .into_iter()
            .find(|mv| strip_san_suffix(&self.san(*mv)) == wanted)
    }

    pub fn has_insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
        if heavy != EMPTY {
            return false;
        }

        let knights = board.pieces(Piece::Knight).popcnt();
        let bishops = *board.pieces(Piece::Bishop);
        match (knights, bishops.popcnt()) {
            (0, 0) | (1, 0) | (0, 1) => true,
            // any number of bishops, all on squares of one colour
            (0, _) => {
                let light = bishops & light_squares();
                light == EMPTY || light == bishops
            }
            _ => false,
        }
    }
}

fn matches_ban(mv: &ChessMove, ban: &BannedMove) -> bool {
    mv.get_source().to_string() == ban.from && mv.get_dest().to_string() == ban.to
}

fn file_distance(a: Square, b: Square) -> usize {
    let (a, b) = (a.get_file().to_index(), b.get_file().to_index());
    a.max(b) - a.min(b)
}

fn file_char(square: Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_char(square: Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

fn strip_san_suffix(san: &str) -> &str {
    san.trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'))
}

fn light_squares() -> BitBoard {
    chess::ALL_SQUARES
        .iter()
        .filter(|sq| (sq.get_file().to_index() + sq.get_rank().to_index()) % 2 == 1)
        .fold(EMPTY, |acc, sq| acc | BitBoard::from_square(*sq))
}

fn parse_square(name: &str) -> Result<Square, ChessServiceError> {
    Square::from_str(&name.to_ascii_lowercase())
        .map_err(|_| ChessServiceError::InvalidMove(format!("Invalid square: {}", name)))
}

fn parse_promotion(piece: &str) -> Result<Piece, ChessServiceError> {
    match piece.to_ascii_lowercase().as_str() {
        "q" => Ok(Piece::Queen),
        "r" => Ok(Piece::Rook),
        "b" => Ok(Piece::Bishop),
        "n" => Ok(Piece::Knight),
        _ => Err(ChessServiceError::InvalidMove(format!(
            "Invalid promotion piece: {}",
            piece
        ))),
    }
}

/// Outcome of applying a move to a position and its move text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub fen: String,
    pub pgn: String,
    pub san: String,
    pub color: Color,
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
    /// The ban that was in force, now consumed.
    pub banned_move: Option<BannedMove>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameOverStatus {
    pub is_over: bool,
    pub result: Option<GameResult>,
    pub reason: Option<EndReason>,
}

impl GameOverStatus {
    fn ongoing() -> Self {
        GameOverStatus {
            is_over: false,
            result: None,
            reason: None,
        }
    }

    fn over(result: GameResult, reason: EndReason) -> Self {
        GameOverStatus {
            is_over: true,
            result: Some(result),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChessService;

impl ChessService {
    pub fn new() -> Self {
        ChessService
    }

    /// Legal moves for `side`, grouped by origin square, with the pending ban
    /// from `pgn` removed. Empty when `side` is not to move.
    pub fn legal_moves(
        &self,
        fen: &str,
        pgn: &str,
        side: Color,
    ) -> Result<LegalMoveMap, ChessServiceError> {
        let position = Position::from_fen(fen)?;
        let text = MoveText::parse(pgn)?;

        let mut moves = LegalMoveMap::new();
        if position.side_to_move() != side {
            return Ok(moves);
        }

        for mv in position.legal_moves_excluding(text.pending_ban()) {
            let destinations = moves.entry(mv.get_source().to_string()).or_default();
            let dest = mv.get_dest().to_string();
            // promotion variants share a destination
            if !destinations.contains(&dest) {
                destinations.push(dest);
            }
        }
        Ok(moves)
    }

    /// Validates and plays a move, returning the new FEN and move text.
    pub fn apply_move(
        &self,
        fen: &str,
        pgn: &str,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> Result<AppliedMove, ChessServiceError> {
        let position = Position::from_fen(fen)?;
        let mut text = MoveText::parse(pgn)?;

        let source = parse_square(from)?;
        let dest = parse_square(to)?;
        let promotion = match promotion {
            Some(piece) => Some(parse_promotion(piece)?),
            None => {
                let last_rank = match position.board().side_to_move() {
                    chess::Color::White => chess::Rank::Eighth,
                    chess::Color::Black => chess::Rank::First,
                };
                let is_pawn = position.board().piece_on(source) == Some(Piece::Pawn);
                (is_pawn && dest.get_rank() == last_rank).then_some(Piece::Queen)
            }
        };
        let chess_move = ChessMove::new(source, dest, promotion);

        if !position.board().legal(chess_move) {
            return Err(ChessServiceError::InvalidMove(format!(
                "{}{} is not legal",
                source, dest
            )));
        }
        let banned_move = text.pending_ban().cloned();
        if let Some(ban) = &banned_move {
            if matches_ban(&chess_move, ban) {
                return Err(ChessServiceError::InvalidMove(format!(
                    "{} is banned this turn",
                    ban
                )));
            }
        }

        let san = position.san(chess_move);
        let next = position.play(chess_move);
        text.push_move(&san);

        Ok(AppliedMove {
            fen: next.fen(),
            pgn: text.render(),
            san,
            color: position.side_to_move(),
            from: source.to_string(),
            to: dest.to_string(),
            promotion: promotion.map(|p| piece_letter(p).to_ascii_lowercase().to_string()),
            banned_move,
        })
    }

    /// Records a ban on the side to move's next move.
    pub fn apply_ban_annotation(
        &self,
        fen: &str,
        pgn: &str,
        banned: &BannedMove,
    ) -> Result<String, ChessServiceError> {
        let position = Position::from_fen(fen)?;
        let mut text = MoveText::parse(pgn)?;

        if let Some(pending) = text.pending_ban() {
            return Err(ChessServiceError::InvalidBan(format!(
                "{} is already banned this turn",
                pending
            )));
        }
        let is_legal = position
            .legal_moves()
            .iter()
            .any(|mv| matches_ban(mv, banned));
        if !is_legal {
            return Err(ChessServiceError::InvalidBan(format!(
                "{} is not a legal move for {}",
                banned,
                position.side_to_move()
            )));
        }

        text.push_ban(banned.clone());
        Ok(text.render())
    }

    /// Terminal state of the position, judged on the ban-filtered move set.
    pub fn is_game_over(&self, fen: &str, pgn: &str) -> Result<GameOverStatus, ChessServiceError> {
        let position = Position::from_fen(fen)?;
        let text = MoveText::parse(pgn)?;

        if position
            .legal_moves_excluding(text.pending_ban())
            .is_empty()
        {
            return Ok(if position.is_check() {
                let winner = position.side_to_move().opponent();
                GameOverStatus::over(GameResult::win_for(winner), EndReason::Checkmate)
            } else {
                GameOverStatus::over(GameResult::Draw, EndReason::Stalemate)
            });
        }
        if position.has_insufficient_material() {
            return Ok(GameOverStatus::over(
                GameResult::Draw,
                EndReason::InsufficientMaterial,
            ));
        }
        if position.halfmove_clock() >= 100 {
            return Ok(GameOverStatus::over(
                GameResult::Draw,
                EndReason::FiftyMoveRule,
            ));
        }
        if self.repetition_count(&position, &text)? >= 3 {
            return Ok(GameOverStatus::over(
                GameResult::Draw,
                EndReason::ThreefoldRepetition,
            ));
        }
        Ok(GameOverStatus::ongoing())
    }

    /// How often `position` occurred in the game recorded by `text`.
    fn repetition_count(
        &self,
        position: &Position,
        text: &MoveText,
    ) -> Result<usize, ChessServiceError> {
        let key = position.key();
        let mut replay = Position::from_fen(text.start_fen())?;
        let mut count = usize::from(replay.key() == key);

        for san in text.moves() {
            let mv = replay.parse_san(san).ok_or_else(|| {
                ChessServiceError::InvalidMoveText(format!("Cannot replay move {}", san))
            })?;
            replay = replay.play(mv);
            if replay.key() == key {
                count += 1;
            }
        }
        Ok(count)
    }
}
