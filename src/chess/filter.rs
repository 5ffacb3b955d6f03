//! Game selection options.
//!
//! Every option is validated once, when the table function is bound, into a
//! closed enum. Downstream code matches on variants and never looks at the
//! raw strings again.

use super::types::{FeaturedRecord, Speed};
use chrono::NaiveDate;
use shakmaty::Color;
use std::collections::BTreeSet;
use std::error::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorFilter {
    #[default]
    Both,
    White,
    Black,
}

impl ColorFilter {
    pub fn parse(raw: &str) -> Result<Self, Box<dyn Error>> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "white" => Ok(Self::White),
            "black" => Ok(Self::Black),
            other => Err(format!(
                "Invalid color value '{other}'. Supported values: 'white', 'black' or 'both'."
            )
            .into()),
        }
    }

    fn accepts(self, color: Color) -> bool {
        match self {
            Self::Both => true,
            Self::White => color == Color::White,
            Self::Black => color == Color::Black,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModeFilter {
    #[default]
    Both,
    Rated,
    Casual,
}

impl ModeFilter {
    pub fn parse(raw: &str) -> Result<Self, Box<dyn Error>> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "rated" => Ok(Self::Rated),
            "casual" => Ok(Self::Casual),
            other => Err(format!(
                "Invalid mode value '{other}'. Supported values: 'rated', 'casual' or 'both'."
            )
            .into()),
        }
    }

    fn accepts(self, rated: bool) -> bool {
        match self {
            Self::Both => true,
            Self::Rated => rated,
            Self::Casual => !rated,
        }
    }
}

/// Selected speed categories. Empty means all of them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpeedSet(BTreeSet<Speed>);

impl SpeedSet {
    /// Parses a comma-separated list such as `blitz,rapid`.
    pub fn parse(raw: &str) -> Result<Self, Box<dyn Error>> {
        let mut speeds = BTreeSet::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let speed = Speed::from_name(part).ok_or_else(|| {
                let supported: Vec<&str> = Speed::ALL.iter().map(|s| s.name()).collect();
                format!(
                    "Invalid speeds value '{part}'. Supported values: {}.",
                    supported.join(", ")
                )
            })?;
            speeds.insert(speed);
        }

        if speeds.is_empty() {
            return Err("Invalid speeds value ''. Provide at least one speed or omit it.".into());
        }
        Ok(Self(speeds))
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Games without a known speed only pass when every speed is selected.
    fn accepts(&self, speed: Option<Speed>) -> bool {
        self.is_all() || speed.is_some_and(|speed| self.0.contains(&speed))
    }
}

pub fn parse_date_bound(name: &str, raw: &str) -> Result<NaiveDate, Box<dyn Error>> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        format!("Invalid {name} value '{}': expected YYYY-MM-DD ({e})", raw.trim()).into()
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GameFilter {
    pub color: ColorFilter,
    pub mode: ModeFilter,
    pub opponent: Option<String>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub speeds: SpeedSet,
}

impl GameFilter {
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(format!("Invalid date range: since {since} is after until {until}").into());
        }
        Ok(())
    }

    pub fn accepts(&self, game: &FeaturedRecord) -> bool {
        if !self.color.accepts(game.player_color) || !self.mode.accepts(game.rated) {
            return false;
        }

        if let Some(opponent) = &self.opponent
            && !game.opponent.eq_ignore_ascii_case(opponent.trim())
        {
            return false;
        }

        if self.since.is_some() || self.until.is_some() {
            let Some(date) = game.date else {
                return false;
            };
            if self.since.is_some_and(|since| date < since)
                || self.until.is_some_and(|until| date > until)
            {
                return false;
            }
        }

        self.speeds.accepts(game.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::types::GameOutcome;

    fn game() -> FeaturedRecord {
        FeaturedRecord {
            date: NaiveDate::from_ymd_opt(2022, 1, 16),
            white: "A".to_string(),
            black: "B".to_string(),
            result: "1-0".to_string(),
            player_color: Color::White,
            opponent: "B".to_string(),
            player_rating: Some(1500),
            opponent_rating: Some(1510),
            outcome: GameOutcome::Win,
            rated: true,
            time_control: None,
            speed: Some(Speed::Blitz),
            eco: None,
            termination: None,
            site: None,
            raw_moves: "1. e4 e5 1-0".to_string(),
        }
    }

    #[test]
    fn test_default_filter_accepts_everything() {
        let filter = GameFilter::default();
        assert!(filter.accepts(&game()));
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_color_filter() {
        let filter = GameFilter {
            color: ColorFilter::parse("Black").unwrap(),
            ..GameFilter::default()
        };
        assert!(!filter.accepts(&game()));

        let mut black_game = game();
        black_game.player_color = Color::Black;
        assert!(filter.accepts(&black_game));
    }

    #[test]
    fn test_mode_filter() {
        let casual = GameFilter {
            mode: ModeFilter::parse("casual").unwrap(),
            ..GameFilter::default()
        };
        assert!(!casual.accepts(&game()));
        let rated = GameFilter {
            mode: ModeFilter::parse("RATED").unwrap(),
            ..GameFilter::default()
        };
        assert!(rated.accepts(&game()));
    }

    #[test]
    fn test_opponent_filter_is_case_insensitive() {
        let filter = GameFilter {
            opponent: Some("b".to_string()),
            ..GameFilter::default()
        };
        assert!(filter.accepts(&game()));

        let filter = GameFilter {
            opponent: Some("C".to_string()),
            ..GameFilter::default()
        };
        assert!(!filter.accepts(&game()));
    }

    #[test]
    fn test_date_bounds_are_inclusive() {
        let filter = GameFilter {
            since: Some(parse_date_bound("since", "2022-01-16").unwrap()),
            until: Some(parse_date_bound("until", "2022-01-16").unwrap()),
            ..GameFilter::default()
        };
        assert!(filter.accepts(&game()));

        let filter = GameFilter {
            since: Some(parse_date_bound("since", "2022-01-17").unwrap()),
            ..GameFilter::default()
        };
        assert!(!filter.accepts(&game()));

        let mut undated = game();
        undated.date = None;
        let filter = GameFilter {
            until: NaiveDate::from_ymd_opt(2030, 1, 1),
            ..GameFilter::default()
        };
        assert!(!filter.accepts(&undated));
    }

    #[test]
    fn test_inverted_date_range_is_rejected() {
        let filter = GameFilter {
            since: NaiveDate::from_ymd_opt(2023, 1, 1),
            until: NaiveDate::from_ymd_opt(2022, 1, 1),
            ..GameFilter::default()
        };
        let err = filter.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid date range"));
    }

    #[test]
    fn test_speed_set() {
        let speeds = SpeedSet::parse("bullet, Rapid").unwrap();
        assert!(!speeds.is_all());
        let filter = GameFilter {
            speeds,
            ..GameFilter::default()
        };
        assert!(!filter.accepts(&game()));

        let filter = GameFilter {
            speeds: SpeedSet::parse("blitz").unwrap(),
            ..GameFilter::default()
        };
        assert!(filter.accepts(&game()));

        let mut unknown_speed = game();
        unknown_speed.speed = None;
        assert!(!filter.accepts(&unknown_speed));
    }

    #[test]
    fn test_invalid_values_name_the_parameter() {
        let err = ColorFilter::parse("red").unwrap_err().to_string();
        assert!(err.contains("Invalid color value 'red'"));

        let err = ModeFilter::parse("").unwrap_err().to_string();
        assert!(err.contains("Invalid mode value ''"));

        let err = SpeedSet::parse("blitz,hyper").unwrap_err().to_string();
        assert!(err.contains("Invalid speeds value 'hyper'"));
        assert!(err.contains("correspondence"));

        assert!(SpeedSet::parse(" , ").is_err());

        let err = parse_date_bound("since", "2022/01/01").unwrap_err().to_string();
        assert!(err.contains("Invalid since value"));
    }
}
