//! Move text with ban annotations.
//!
//! Bans are written as `{banning: e2e4}` comments directly before the move
//! they restricted. A trailing ban with no move after it is the ban currently
//! in force. Games that start from a custom position carry the usual
//! `[SetUp "1"]` / `[FEN "..."]` header pair.

use std::fmt;

use crate::models::game::{normalize_fen, BannedMove, GameResult, STARTING_FEN};

const BAN_PREFIX: &str = "banning:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTextEntry {
    Ban(BannedMove),
    Move(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTextError {
    UnterminatedComment,
    UnterminatedHeader,
    InvalidBan(String),
    UnexpectedToken(String),
}

impl fmt::Display for MoveTextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveTextError::UnterminatedComment => write!(f, "Unterminated comment"),
            MoveTextError::UnterminatedHeader => write!(f, "Unterminated header"),
            MoveTextError::InvalidBan(text) => write!(f, "Invalid ban annotation: {}", text),
            MoveTextError::UnexpectedToken(token) => write!(f, "Unexpected token: {}", token),
        }
    }
}

impl std::error::Error for MoveTextError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveText {
    start_fen: Option<String>,
    entries: Vec<MoveTextEntry>,
    result: Option<String>,
}

impl MoveText {
    pub fn new() -> Self {
        MoveText::default()
    }

    pub fn from_position(fen: &str) -> Self {
        let fen = normalize_fen(fen);
        MoveText {
            start_fen: (fen != STARTING_FEN).then_some(fen),
            ..MoveText::default()
        }
    }

    pub fn parse(text: &str) -> Result<Self, MoveTextError> {
        let mut parsed = MoveText::default();
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '[' => {
                    let end = find_from(&chars, i + 1, ']')
                        .ok_or(MoveTextError::UnterminatedHeader)?;
                    let header: String = chars[i + 1..end].iter().collect();
                    parsed.read_header(&header);
                    i = end + 1;
                }
                '{' => {
                    let end = find_from(&chars, i + 1, '}')
                        .ok_or(MoveTextError::UnterminatedComment)?;
                    let comment: String = chars[i + 1..end].iter().collect();
                    parsed.read_comment(&comment)?;
                    i = end + 1;
                }
                ';' => {
                    i = find_from(&chars, i, '\n').map_or(chars.len(), |end| end + 1);
                }
                c if c.is_whitespace() => i += 1,
                _ => {
                    let start = i;
                    while i < chars.len()
                        && !chars[i].is_whitespace()
                        && chars[i] != '{'
                        && chars[i] != '['
                    {
                        i += 1;
                    }
                    let token: String = chars[start..i].iter().collect();
                    parsed.read_token(&token)?;
                }
            }
        }

        Ok(parsed)
    }

    fn read_header(&mut self, header: &str) {
        let header = header.trim();
        let (name, value) = match header.split_once(char::is_whitespace) {
            Some(parts) => parts,
            None => return,
        };
        if name == "FEN" {
            let fen = normalize_fen(value.trim().trim_matches('"'));
            self.start_fen = (fen != STARTING_FEN).then_some(fen);
        }
    }

    fn read_comment(&mut self, comment: &str) -> Result<(), MoveTextError> {
        let comment = comment.trim();
        if let Some(rest) = comment.strip_prefix(BAN_PREFIX) {
            let ban = BannedMove::from_uci(rest)
                .ok_or_else(|| MoveTextError::InvalidBan(comment.to_string()))?;
            self.entries.push(MoveTextEntry::Ban(ban));
        }
        Ok(())
    }

    fn read_token(&mut self, token: &str) -> Result<(), MoveTextError> {
        match token {
            "1-0" | "0-1" | "1/2-1/2" => {
                self.result = Some(token.to_string());
                return Ok(());
            }
            "*" => return Ok(()),
            _ => {}
        }
        if token.starts_with('$') {
            return Ok(());
        }

        let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
        let san = if digits > 0 {
            let rest = &token[digits..];
            if !rest.starts_with('.') {
                return Err(MoveTextError::UnexpectedToken(token.to_string()));
            }
            rest.trim_start_matches('.')
        } else {
            token
        };

        if !san.is_empty() {
            self.entries.push(MoveTextEntry::Move(san.to_string()));
        }
        Ok(())
    }

    pub fn start_fen(&self) -> &str {
        self.start_fen.as_deref().unwrap_or(STARTING_FEN)
    }

    pub fn entries(&self) -> &[MoveTextEntry] {
        &self.entries
    }

    /// The ban in force for the next move, if one has been recorded since the
    /// last move.
    pub fn pending_ban(&self) -> Option<&BannedMove> {
        match self.entries.last() {
            Some(MoveTextEntry::Ban(ban)) => Some(ban),
            _ => None,
        }
    }

    pub fn push_ban(&mut self, ban: BannedMove) {
        self.entries.push(MoveTextEntry::Ban(ban));
    }

    pub fn push_move(&mut self, san: &str) {
        self.entries.push(MoveTextEntry::Move(san.to_string()));
    }

    pub fn moves(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            MoveTextEntry::Move(san) => Some(san.as_str()),
            MoveTextEntry::Ban(_) => None,
        })
    }

    pub fn move_count(&self) -> usize {
        self.moves().count()
    }

    /// Every move paired with the ban that was in force when it was played.
    pub fn moves_with_bans(&self) -> Vec<(Option<&BannedMove>, &str)> {
        let mut pairs = Vec::new();
        let mut ban = None;
        for entry in &self.entries {
            match entry {
                MoveTextEntry::Ban(b) => ban = Some(b),
                MoveTextEntry::Move(san) => pairs.push((ban.take(), san.as_str())),
            }
        }
        pairs
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn set_result(&mut self, result: GameResult) {
        self.result = Some(result.as_pgn().to_string());
    }

    fn start_counters(&self) -> (u32, bool) {
        let fen = self.start_fen();
        let mut fields = fen.split_whitespace().skip(1);
        let white_to_move = fields.next() != Some("b");
        let number = fields.nth(3).and_then(|n| n.parse().ok()).unwrap_or(1);
        (number, white_to_move)
    }

    pub fn render(&self) -> String {
        let (mut number, mut white_to_move) = self.start_counters();
        let mut tokens: Vec<String> = Vec::new();
        let mut follows_white_move = false;

        for entry in &self.entries {
            match entry {
                MoveTextEntry::Ban(ban) => {
                    tokens.push(format!("{{{} {}}}", BAN_PREFIX, ban.uci()));
                    follows_white_move = false;
                }
                MoveTextEntry::Move(san) => {
                    if white_to_move {
                        tokens.push(format!("{}. {}", number, san));
                        follows_white_move = true;
                    } else {
                        if follows_white_move {
                            tokens.push(san.clone());
                        } else {
                            tokens.push(format!("{}... {}", number, san));
                        }
                        number += 1;
                        follows_white_move = false;
                    }
                    white_to_move = !white_to_move;
                }
            }
        }
        if let Some(result) = &self.result {
            tokens.push(result.clone());
        }

        let mut out = String::new();
        if let Some(fen) = &self.start_fen {
            out.push_str("[SetUp \"1\"]\n");
            out.push_str(&format!("[FEN \"{}\"]\n", fen));
            if !tokens.is_empty() {
                out.push('\n');
            }
        }
        out.push_str(&tokens.join(" "));
        out
    }
}

fn find_from(chars: &[char], start: usize, target: char) -> Option<usize> {
    chars[start.min(chars.len())..]
        .iter()
        .position(|&c| c == target)
        .map(|offset| start + offset)
}
