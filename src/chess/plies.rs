use super::duckdb_impl::scalar::invoke_movetext_to_optional_varchar;
use super::exclusion::is_result_token;
use duckdb::{
    core::{DataChunkHandle, LogicalTypeHandle, LogicalTypeId},
    vscalar::{ScalarFunctionSignature, VScalar},
    vtab::arrow::WritableVector,
};
use regex::Regex;
use smallvec::SmallVec;
use std::error::Error;
use std::fmt;
use std::sync::LazyLock;

/// Appended after the last real move so that a short game shows up as a
/// marker inside the requested window instead of a shorter sequence.
pub const END_OF_GAME_MARKER: &str = "Game_End";

/// Move numbers (`1.`, `12.`, `3...`) at the start of the text or after whitespace.
static MOVE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)\d+\.+").expect("valid move number regex"));

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("valid comment regex"));

pub type PlyTokens = SmallVec<[String; 16]>;

/// Number of full moves kept per game; the ply sequence is twice as long.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlyDepth(u32);

impl PlyDepth {
    pub const DEFAULT: PlyDepth = PlyDepth(3);
    pub const MAX: u32 = 20;

    pub fn new(depth: i64) -> Result<Self, Box<dyn Error>> {
        match u32::try_from(depth) {
            Ok(depth) if (1..=Self::MAX).contains(&depth) => Ok(Self(depth)),
            _ => Err(format!(
                "Invalid depth value {depth}. Supported values: 1..={}.",
                Self::MAX
            )
            .into()),
        }
    }

    pub fn moves(self) -> u32 {
        self.0
    }

    pub fn plies(self) -> usize {
        2 * self.0 as usize
    }
}

impl Default for PlyDepth {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The first `2 * depth` plies of a game. Always exactly that long.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlySequence(PlyTokens);

impl PlySequence {
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn joined(&self) -> String {
        self.0.join(" ")
    }
}

/// The game ended before the requested number of plies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsufficientDepth {
    pub available: usize,
    pub required: usize,
}

impl fmt::Display for InsufficientDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "game has {} plies, {} required",
            self.available, self.required
        )
    }
}

impl Error for InsufficientDepth {}

fn strip_trailing_result(moves: &str) -> &str {
    let moves = moves.trim_end();
    match moves.rsplit_once(char::is_whitespace) {
        Some((head, last)) if is_result_token(last) => head,
        None if is_result_token(moves) => "",
        _ => moves,
    }
}

/// Expands a raw move line into its first `2 * depth` plies.
pub fn expand_plies(raw_moves: &str, depth: PlyDepth) -> Result<PlySequence, InsufficientDepth> {
    let required = depth.plies();
    let without_comments = COMMENT_RE.replace_all(raw_moves, " ");
    let mut text = strip_trailing_result(&without_comments).to_string();
    text.push(' ');
    text.push_str(END_OF_GAME_MARKER);

    let text = MOVE_NUMBER_RE.replace_all(&text, " ");
    let tokens: PlyTokens = text
        .split_whitespace()
        .take(required)
        .map(str::to_string)
        .collect();

    match tokens.iter().position(|token| token == END_OF_GAME_MARKER) {
        Some(available) => Err(InsufficientDepth {
            available,
            required,
        }),
        None if tokens.len() < required => Err(InsufficientDepth {
            available: tokens.len(),
            required,
        }),
        None => Ok(PlySequence(tokens)),
    }
}

/// One `chess_ply_path` value. A NULL depth argument means the default depth.
fn ply_path(moves: &str, depth: Option<i64>) -> Result<Option<String>, Box<dyn Error>> {
    let depth = match depth {
        Some(depth) => PlyDepth::new(depth)?,
        None => PlyDepth::DEFAULT,
    };
    Ok(expand_plies(moves, depth).ok().map(|plies| plies.joined()))
}

/// `chess_ply_path(moves [, depth])`: space-joined plies, or NULL when the
/// game is too short.
pub struct ChessPlyPathScalar;

impl VScalar for ChessPlyPathScalar {
    type State = ();

    unsafe fn invoke(
        _state: &Self::State,
        input: &mut DataChunkHandle,
        output: &mut dyn WritableVector,
    ) -> Result<(), Box<dyn Error>> {
        invoke_movetext_to_optional_varchar(input, output, ply_path)
    }

    fn signatures() -> Vec<ScalarFunctionSignature> {
        vec![
            ScalarFunctionSignature::exact(
                vec![LogicalTypeHandle::from(LogicalTypeId::Varchar)],
                LogicalTypeHandle::from(LogicalTypeId::Varchar),
            ),
            ScalarFunctionSignature::exact(
                vec![
                    LogicalTypeHandle::from(LogicalTypeId::Varchar),
                    LogicalTypeHandle::from(LogicalTypeId::Bigint),
                ],
                LogicalTypeHandle::from(LogicalTypeId::Varchar),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(moves: i64) -> PlyDepth {
        PlyDepth::new(moves).unwrap()
    }

    fn tokens(plies: &PlySequence) -> Vec<&str> {
        plies.tokens().iter().map(String::as_str).collect()
    }

    #[test]
    fn test_depth_one_takes_first_two_plies() {
        let plies = expand_plies("1. e4 e5 2. Nf3 1-0", depth(1)).unwrap();
        assert_eq!(tokens(&plies), vec!["e4", "e5"]);
        assert_eq!(plies.len(), 2);
    }

    #[test]
    fn test_short_game_is_insufficient() {
        let err = expand_plies("1. e4 e5 2. Nf3 1-0", depth(2)).unwrap_err();
        assert_eq!(
            err,
            InsufficientDepth {
                available: 3,
                required: 4
            }
        );
    }

    #[test]
    fn test_exact_length_game_is_kept() {
        let plies = expand_plies("1. d4 d5 2. c4 e6 0-1", depth(2)).unwrap();
        assert_eq!(tokens(&plies), vec!["d4", "d5", "c4", "e6"]);
    }

    #[test]
    fn test_sequence_length_is_always_twice_depth() {
        let moves = "1. e4 c5 2. Nf3 d6 3. d4 cxd4 4. Nxd4 Nf6 5. Nc3 a6 1/2-1/2";
        for moves_deep in 1..=5 {
            let plies = expand_plies(moves, depth(moves_deep)).unwrap();
            assert_eq!(plies.len(), 2 * moves_deep as usize);
        }
        assert!(expand_plies(moves, depth(6)).is_err());
    }

    #[test]
    fn test_move_numbers_without_spaces_and_continuations() {
        let plies = expand_plies("1.e4 e5 2.Nf3 Nc6 *", depth(2)).unwrap();
        assert_eq!(tokens(&plies), vec!["e4", "e5", "Nf3", "Nc6"]);

        let plies = expand_plies(
            "1. e4 { [%clk 0:03:00] } 1... e5 { [%clk 0:03:00] } 2. Nf3 Nc6 1-0",
            depth(2),
        )
        .unwrap();
        assert_eq!(tokens(&plies), vec!["e4", "e5", "Nf3", "Nc6"]);
    }

    #[test]
    fn test_promotion_and_check_tokens_survive() {
        let plies = expand_plies("1. e4 d5 2. exd5 Qxd5+ 1-0", depth(2)).unwrap();
        assert_eq!(tokens(&plies), vec!["e4", "d5", "exd5", "Qxd5+"]);
    }

    #[test]
    fn test_result_only_text_has_no_plies() {
        let err = expand_plies("0-1", depth(1)).unwrap_err();
        assert_eq!(err.available, 0);
        let err = expand_plies("", depth(1)).unwrap_err();
        assert_eq!(err.available, 0);
    }

    #[test]
    fn test_unterminated_move_text_still_expands() {
        let plies = expand_plies("1. e4 e5", depth(1)).unwrap();
        assert_eq!(plies.joined(), "e4 e5");
    }

    #[test]
    fn test_strip_trailing_result() {
        assert_eq!(strip_trailing_result("1. e4 1-0"), "1. e4");
        assert_eq!(strip_trailing_result("1. e4 e5"), "1. e4 e5");
        assert_eq!(strip_trailing_result("1/2-1/2"), "");
    }

    #[test]
    fn test_ply_depth_bounds() {
        assert!(PlyDepth::new(0).is_err());
        assert!(PlyDepth::new(-3).is_err());
        assert!(PlyDepth::new(21).is_err());
        assert_eq!(PlyDepth::new(20).unwrap().plies(), 40);
        assert_eq!(PlyDepth::default().moves(), 3);

        let err = PlyDepth::new(0).unwrap_err().to_string();
        assert!(err.contains("Invalid depth value 0"));
    }

    #[test]
    fn test_insufficient_depth_message() {
        let err = InsufficientDepth {
            available: 1,
            required: 6,
        };
        assert_eq!(err.to_string(), "game has 1 plies, 6 required");
    }

    #[test]
    fn test_ply_path_values() {
        let ruy_lopez = "1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0";
        assert_eq!(
            ply_path(ruy_lopez, None).unwrap().as_deref(),
            Some("e4 e5 Nf3 Nc6 Bb5 a6")
        );
        assert_eq!(ply_path(ruy_lopez, Some(1)).unwrap().as_deref(), Some("e4 e5"));
        assert_eq!(ply_path("1. e4 e5 2. Nf3 1-0", Some(2)).unwrap(), None);
        assert!(ply_path(ruy_lopez, Some(0)).is_err());
    }
}
