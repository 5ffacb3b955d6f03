use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct ErrorAccumulator(Option<String>);

impl ErrorAccumulator {
    pub fn push(&mut self, msg: &str) {
        match &mut self.0 {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(msg);
            }
            None => {
                self.0 = Some(msg.to_string());
            }
        }
    }

    pub fn take(&mut self) -> Option<String> {
        self.0.take()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Enough of a game's headers to find it again in the source export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameIdentity {
    pub site: Option<String>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub date: Option<String>,
}

impl fmt::Display for GameIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "?".to_string());
        write!(
            f,
            "site='{}' white='{}' black='{}' date='{}'",
            or_unknown(&self.site),
            or_unknown(&self.white),
            or_unknown(&self.black),
            or_unknown(&self.date)
        )
    }
}

/// Violations that point at a logic or configuration error rather than at a
/// malformed record. These terminate the scan instead of being skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityError {
    PlayerNotInGame {
        player: String,
        game: GameIdentity,
    },
    PlayerOnBothSides {
        player: String,
        game: GameIdentity,
    },
    UnrecognizedResult {
        result: Option<String>,
        game: GameIdentity,
    },
    BranchMismatch {
        node: String,
        detail: String,
    },
    PathLength {
        path: String,
        plies: usize,
        expected: usize,
    },
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayerNotInGame { player, game } => write!(
                f,
                "Integrity error: player '{player}' is neither White nor Black ({game})"
            ),
            Self::PlayerOnBothSides { player, game } => write!(
                f,
                "Integrity error: player '{player}' is both White and Black ({game})"
            ),
            Self::UnrecognizedResult { result, game } => write!(
                f,
                "Integrity error: unrecognized result '{}' ({game})",
                result.as_deref().unwrap_or("<missing>")
            ),
            Self::BranchMismatch { node, detail } => {
                write!(f, "Integrity error: opening tree node '{node}': {detail}")
            }
            Self::PathLength {
                path,
                plies,
                expected,
            } => write!(
                f,
                "Integrity error: ply path '{path}' has {plies} plies, the tree expects {expected}"
            ),
        }
    }
}

impl Error for IntegrityError {}
