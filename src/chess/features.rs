use super::error::IntegrityError;
use super::types::{FeaturedRecord, GameOutcome, GameRecord, Speed, TimeControl};
use chrono::NaiveDate;
use shakmaty::Color;

/// Derives the named player's view of an accepted record.
///
/// Exactly one of White/Black must be the player (ASCII case-insensitive, as
/// Lichess usernames are); anything else is an [`IntegrityError`].
pub fn derive_features(player: &str, record: &GameRecord) -> Result<FeaturedRecord, IntegrityError> {
    let player_color = player_color(player, record)?;
    let outcome = outcome_for(player_color, record.result.as_deref()).ok_or_else(|| {
        IntegrityError::UnrecognizedResult {
            result: record.result.clone(),
            game: record.identity(),
        }
    })?;

    let white_rating = parse_rating(record.white_elo.as_deref());
    let black_rating = parse_rating(record.black_elo.as_deref());
    let (player_rating, opponent_rating, opponent) = match player_color {
        Color::White => (white_rating, black_rating, record.black.clone()),
        Color::Black => (black_rating, white_rating, record.white.clone()),
    };

    let time_control = record.time_control.as_deref().and_then(parse_time_control);

    Ok(FeaturedRecord {
        date: record
            .utc_date
            .as_deref()
            .and_then(parse_export_date)
            .or_else(|| record.date.as_deref().and_then(parse_export_date)),
        white: record.white.clone().unwrap_or_default(),
        black: record.black.clone().unwrap_or_default(),
        result: record.result.clone().unwrap_or_default(),
        player_color,
        opponent: opponent.unwrap_or_default(),
        player_rating,
        opponent_rating,
        outcome,
        rated: is_rated(record),
        time_control,
        speed: time_control.map(speed_of),
        eco: record.eco.clone(),
        termination: record.termination.clone(),
        site: record.site.clone(),
        raw_moves: record.moves.clone(),
    })
}

fn player_color(player: &str, record: &GameRecord) -> Result<Color, IntegrityError> {
    let matches = |side: &Option<String>| {
        side.as_deref()
            .is_some_and(|name| name.trim().eq_ignore_ascii_case(player.trim()))
    };

    match (matches(&record.white), matches(&record.black)) {
        (true, false) => Ok(Color::White),
        (false, true) => Ok(Color::Black),
        (true, true) => Err(IntegrityError::PlayerOnBothSides {
            player: player.to_string(),
            game: record.identity(),
        }),
        (false, false) => Err(IntegrityError::PlayerNotInGame {
            player: player.to_string(),
            game: record.identity(),
        }),
    }
}

/// Outcome lookup on (player side, result token). A draw is a draw for both.
pub fn outcome_for(player_color: Color, result: Option<&str>) -> Option<GameOutcome> {
    match (player_color, result?.trim()) {
        (_, "1/2-1/2") => Some(GameOutcome::Draw),
        (Color::White, "1-0") | (Color::Black, "0-1") => Some(GameOutcome::Win),
        (Color::White, "0-1") | (Color::Black, "1-0") => Some(GameOutcome::Loss),
        _ => None,
    }
}

fn parse_rating(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse::<u32>().ok()
}

/// Rated games carry rating differentials; casual ones do not.
fn is_rated(record: &GameRecord) -> bool {
    record.white_rating_diff.is_some()
        || record.black_rating_diff.is_some()
        || record
            .event
            .as_deref()
            .is_some_and(|event| event.trim_start().starts_with("Rated"))
}

/// Parses `YYYY.MM.DD` (or `YYYY-MM-DD`). Dates with unknown parts are `None`.
pub fn parse_export_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() || s.contains('?') {
        return None;
    }
    NaiveDate::parse_from_str(&s.replace('-', "."), "%Y.%m.%d").ok()
}

/// Parses Lichess `base+increment` seconds, or `-` for correspondence.
pub fn parse_time_control(raw: &str) -> Option<TimeControl> {
    let s = raw.trim();
    if s == "-" {
        return Some(TimeControl::Unlimited);
    }

    let (base, increment) = match s.split_once('+') {
        Some((base, increment)) => (base, increment),
        None => (s, "0"),
    };
    Some(TimeControl::Clock {
        base_seconds: base.trim().parse().ok()?,
        increment_seconds: increment.trim().parse().ok()?,
    })
}

/// Lichess speed category from the estimated duration `base + 40 * increment`.
pub fn speed_of(time_control: TimeControl) -> Speed {
    match time_control {
        TimeControl::Unlimited => Speed::Correspondence,
        TimeControl::Clock {
            base_seconds,
            increment_seconds,
        } => {
            let estimated_seconds = base_seconds as u64 + 40 * increment_seconds as u64;
            match estimated_seconds {
                0..=29 => Speed::UltraBullet,
                30..=179 => Speed::Bullet,
                180..=479 => Speed::Blitz,
                480..=1499 => Speed::Rapid,
                _ => Speed::Classical,
            }
        }
    }
}
