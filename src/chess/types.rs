use super::error::GameIdentity;
use chrono::NaiveDate;
use shakmaty::Color;
use std::fmt;

/// Tags a Lichess export carries for a standard game. Anything else marks the
/// enclosing record for discard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKey {
    Event,
    Site,
    Date,
    White,
    Black,
    Result,
    UtcDate,
    UtcTime,
    WhiteElo,
    BlackElo,
    WhiteRatingDiff,
    BlackRatingDiff,
    Variant,
    TimeControl,
    Eco,
    Termination,
}

impl TagKey {
    pub const ALL: [TagKey; 16] = [
        TagKey::Event,
        TagKey::Site,
        TagKey::Date,
        TagKey::White,
        TagKey::Black,
        TagKey::Result,
        TagKey::UtcDate,
        TagKey::UtcTime,
        TagKey::WhiteElo,
        TagKey::BlackElo,
        TagKey::WhiteRatingDiff,
        TagKey::BlackRatingDiff,
        TagKey::Variant,
        TagKey::TimeControl,
        TagKey::Eco,
        TagKey::Termination,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Event => "Event",
            Self::Site => "Site",
            Self::Date => "Date",
            Self::White => "White",
            Self::Black => "Black",
            Self::Result => "Result",
            Self::UtcDate => "UTCDate",
            Self::UtcTime => "UTCTime",
            Self::WhiteElo => "WhiteElo",
            Self::BlackElo => "BlackElo",
            Self::WhiteRatingDiff => "WhiteRatingDiff",
            Self::BlackRatingDiff => "BlackRatingDiff",
            Self::Variant => "Variant",
            Self::TimeControl => "TimeControl",
            Self::Eco => "ECO",
            Self::Termination => "Termination",
        }
    }

    /// Tag names are matched exactly, as they appear in the export.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

/// One game as read from the export: every recognized tag is optional, plus
/// the raw move line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameRecord {
    pub event: Option<String>,
    pub site: Option<String>,
    pub date: Option<String>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub result: Option<String>,
    pub utc_date: Option<String>,
    pub utc_time: Option<String>,
    pub white_elo: Option<String>,
    pub black_elo: Option<String>,
    pub white_rating_diff: Option<String>,
    pub black_rating_diff: Option<String>,
    pub variant: Option<String>,
    pub time_control: Option<String>,
    pub eco: Option<String>,
    pub termination: Option<String>,

    pub moves: String,
}

impl GameRecord {
    pub fn field(&self, key: TagKey) -> Option<&str> {
        match key {
            TagKey::Event => self.event.as_deref(),
            TagKey::Site => self.site.as_deref(),
            TagKey::Date => self.date.as_deref(),
            TagKey::White => self.white.as_deref(),
            TagKey::Black => self.black.as_deref(),
            TagKey::Result => self.result.as_deref(),
            TagKey::UtcDate => self.utc_date.as_deref(),
            TagKey::UtcTime => self.utc_time.as_deref(),
            TagKey::WhiteElo => self.white_elo.as_deref(),
            TagKey::BlackElo => self.black_elo.as_deref(),
            TagKey::WhiteRatingDiff => self.white_rating_diff.as_deref(),
            TagKey::BlackRatingDiff => self.black_rating_diff.as_deref(),
            TagKey::Variant => self.variant.as_deref(),
            TagKey::TimeControl => self.time_control.as_deref(),
            TagKey::Eco => self.eco.as_deref(),
            TagKey::Termination => self.termination.as_deref(),
        }
    }

    pub fn field_mut(&mut self, key: TagKey) -> &mut Option<String> {
        match key {
            TagKey::Event => &mut self.event,
            TagKey::Site => &mut self.site,
            TagKey::Date => &mut self.date,
            TagKey::White => &mut self.white,
            TagKey::Black => &mut self.black,
            TagKey::Result => &mut self.result,
            TagKey::UtcDate => &mut self.utc_date,
            TagKey::UtcTime => &mut self.utc_time,
            TagKey::WhiteElo => &mut self.white_elo,
            TagKey::BlackElo => &mut self.black_elo,
            TagKey::WhiteRatingDiff => &mut self.white_rating_diff,
            TagKey::BlackRatingDiff => &mut self.black_rating_diff,
            TagKey::Variant => &mut self.variant,
            TagKey::TimeControl => &mut self.time_control,
            TagKey::Eco => &mut self.eco,
            TagKey::Termination => &mut self.termination,
        }
    }

    /// Iterates the tags that have been set, in whitelist order.
    pub fn fields(&self) -> impl Iterator<Item = (TagKey, &str)> + '_ {
        TagKey::ALL
            .into_iter()
            .filter_map(|key| self.field(key).map(|value| (key, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.fields().next().is_none() && self.moves.is_empty()
    }

    pub fn identity(&self) -> GameIdentity {
        GameIdentity {
            site: self.site.clone(),
            white: self.white.clone(),
            black: self.black.clone(),
            date: self.utc_date.clone().or_else(|| self.date.clone()),
        }
    }
}

/// Result of a game from the named player's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameOutcome {
    Win,
    Loss,
    Draw,
}

impl GameOutcome {
    pub fn score(self) -> f64 {
        match self {
            Self::Win => 1.0,
            Self::Loss => 0.0,
            Self::Draw => 0.5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Draw => "draw",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeControl {
    Clock {
        base_seconds: u32,
        increment_seconds: u32,
    },
    /// Correspondence games export `TimeControl "-"`.
    Unlimited,
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clock {
                base_seconds,
                increment_seconds,
            } => write!(f, "{base_seconds}+{increment_seconds}"),
            Self::Unlimited => f.write_str("-"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Speed {
    UltraBullet,
    Bullet,
    Blitz,
    Rapid,
    Classical,
    Correspondence,
}

impl Speed {
    pub const ALL: [Speed; 6] = [
        Speed::UltraBullet,
        Speed::Bullet,
        Speed::Blitz,
        Speed::Rapid,
        Speed::Classical,
        Speed::Correspondence,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::UltraBullet => "ultrabullet",
            Self::Bullet => "bullet",
            Self::Blitz => "blitz",
            Self::Rapid => "rapid",
            Self::Classical => "classical",
            Self::Correspondence => "correspondence",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL.into_iter().find(|speed| speed.name() == normalized)
    }
}

/// Per-game features relative to the named player.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturedRecord {
    pub date: Option<NaiveDate>,
    pub white: String,
    pub black: String,
    pub result: String,
    pub player_color: Color,
    pub opponent: String,
    pub player_rating: Option<u32>,
    pub opponent_rating: Option<u32>,
    pub outcome: GameOutcome,
    pub rated: bool,
    pub time_control: Option<TimeControl>,
    pub speed: Option<Speed>,
    pub eco: Option<String>,
    pub termination: Option<String>,
    pub site: Option<String>,
    pub raw_moves: String,
}
