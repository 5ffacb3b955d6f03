//! Streaming record parser for Lichess game exports.
//!
//! The export is line oriented: a block of `[Key "Value"]` tag lines followed
//! by a single move line. [`RecordParser`] reads one line at a time and feeds
//! a [`RecordBuilder`] that is moved through the stream and either finalized
//! into a [`GameRecord`] or dropped at each move line. A bad record never
//! stops the stream; it is counted in [`ParseStats`] and the next record
//! starts fresh.

use super::error::{ErrorAccumulator, GameIdentity};
use super::exclusion::ExclusionTriggers;
use super::log;
use super::types::{GameRecord, TagKey};
use serde_json::json;
use std::io::BufRead;
use std::mem;

/// Tags a record must carry before the feature stage can use it.
const REQUIRED_TAGS: [TagKey; 3] = [TagKey::White, TagKey::Black, TagKey::Result];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    UnknownTag,
    DuplicateTag,
    MalformedTag,
    UnsupportedVariant,
    SentinelValue,
    MidGameStart,
    AbandonedGame,
    MissingTag,
    IncompleteAtEof,
}

impl DiscardReason {
    pub const ALL: [DiscardReason; 9] = [
        Self::UnknownTag,
        Self::DuplicateTag,
        Self::MalformedTag,
        Self::UnsupportedVariant,
        Self::SentinelValue,
        Self::MidGameStart,
        Self::AbandonedGame,
        Self::MissingTag,
        Self::IncompleteAtEof,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::UnknownTag => "unknown_tag",
            Self::DuplicateTag => "duplicate_tag",
            Self::MalformedTag => "malformed_tag",
            Self::UnsupportedVariant => "unsupported_variant",
            Self::SentinelValue => "sentinel_value",
            Self::MidGameStart => "mid_game_start",
            Self::AbandonedGame => "abandoned_game",
            Self::MissingTag => "missing_tag",
            Self::IncompleteAtEof => "incomplete_at_eof",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines_read: u64,
    pub noise_lines: u64,
    pub records_emitted: u64,
    pub unknown_tag: u64,
    pub duplicate_tag: u64,
    pub malformed_tag: u64,
    pub unsupported_variant: u64,
    pub sentinel_value: u64,
    pub mid_game_start: u64,
    pub abandoned_game: u64,
    pub missing_tag: u64,
    pub incomplete_at_eof: u64,
}

impl ParseStats {
    fn counter_mut(&mut self, reason: DiscardReason) -> &mut u64 {
        match reason {
            DiscardReason::UnknownTag => &mut self.unknown_tag,
            DiscardReason::DuplicateTag => &mut self.duplicate_tag,
            DiscardReason::MalformedTag => &mut self.malformed_tag,
            DiscardReason::UnsupportedVariant => &mut self.unsupported_variant,
            DiscardReason::SentinelValue => &mut self.sentinel_value,
            DiscardReason::MidGameStart => &mut self.mid_game_start,
            DiscardReason::AbandonedGame => &mut self.abandoned_game,
            DiscardReason::MissingTag => &mut self.missing_tag,
            DiscardReason::IncompleteAtEof => &mut self.incomplete_at_eof,
        }
    }

    pub fn record_discard(&mut self, reason: DiscardReason) {
        *self.counter_mut(reason) += 1;
    }

    pub fn discards(&self, reason: DiscardReason) -> u64 {
        match reason {
            DiscardReason::UnknownTag => self.unknown_tag,
            DiscardReason::DuplicateTag => self.duplicate_tag,
            DiscardReason::MalformedTag => self.malformed_tag,
            DiscardReason::UnsupportedVariant => self.unsupported_variant,
            DiscardReason::SentinelValue => self.sentinel_value,
            DiscardReason::MidGameStart => self.mid_game_start,
            DiscardReason::AbandonedGame => self.abandoned_game,
            DiscardReason::MissingTag => self.missing_tag,
            DiscardReason::IncompleteAtEof => self.incomplete_at_eof,
        }
    }

    pub fn discarded(&self) -> u64 {
        DiscardReason::ALL
            .into_iter()
            .map(|reason| self.discards(reason))
            .sum()
    }

    pub fn merge(&mut self, other: &ParseStats) {
        self.lines_read += other.lines_read;
        self.noise_lines += other.noise_lines;
        self.records_emitted += other.records_emitted;
        self.unknown_tag += other.unknown_tag;
        self.duplicate_tag += other.duplicate_tag;
        self.malformed_tag += other.malformed_tag;
        self.unsupported_variant += other.unsupported_variant;
        self.sentinel_value += other.sentinel_value;
        self.mid_game_start += other.mid_game_start;
        self.abandoned_game += other.abandoned_game;
        self.missing_tag += other.missing_tag;
        self.incomplete_at_eof += other.incomplete_at_eof;
    }

    pub fn to_json(&self) -> serde_json::Value {
        let reasons: serde_json::Map<String, serde_json::Value> = DiscardReason::ALL
            .into_iter()
            .map(|reason| (reason.label().to_string(), json!(self.discards(reason))))
            .collect();
        json!({
            "lines_read": self.lines_read,
            "noise_lines": self.noise_lines,
            "records_emitted": self.records_emitted,
            "discarded": self.discarded(),
            "discard_reasons": reasons,
        })
    }
}

/// A record that did not make it into the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Discarded {
    pub reason: DiscardReason,
    pub detail: String,
    pub game: GameIdentity,
}

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Blank,
    Tag { name: &'a str, value: &'a str },
    MalformedTag,
    Moves(&'a str),
    Noise,
}

fn classify_line<'a>(line: &'a str, triggers: &ExclusionTriggers) -> Line<'a> {
    let trimmed = line.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }

    if trimmed.starts_with('[') {
        return match parse_tag_line(trimmed) {
            Some((name, value)) => Line::Tag { name, value },
            None => Line::MalformedTag,
        };
    }

    let starts_with_digit = trimmed.as_bytes()[0].is_ascii_digit();
    if starts_with_digit || triggers.is_result_only_line(trimmed) {
        return Line::Moves(trimmed);
    }

    Line::Noise
}

/// Splits `[Key "Value"]` into its key and unquoted value.
fn parse_tag_line(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (name, rest) = inner.split_once(' ')?;
    if name.is_empty() {
        return None;
    }
    let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((name, value))
}

/// A move line must begin the game at move one; `1...` or `12.` mean the
/// export started from a custom position.
fn starts_at_first_move(moves: &str) -> bool {
    moves
        .strip_prefix("1.")
        .is_some_and(|rest| !rest.starts_with('.'))
}

/// Per-record accumulator. Owned by the parser between record boundaries and
/// consumed by [`RecordBuilder::finish`].
#[derive(Debug, Default)]
pub struct RecordBuilder {
    record: GameRecord,
    first_problem: Option<DiscardReason>,
    problems: ErrorAccumulator,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing has been read for this record yet.
    pub fn is_empty(&self) -> bool {
        self.record.is_empty() && self.problems.is_empty()
    }

    fn reject(&mut self, reason: DiscardReason, detail: &str) {
        self.first_problem.get_or_insert(reason);
        self.problems.push(detail);
    }

    pub fn with_tag(mut self, name: &str, value: &str, triggers: &ExclusionTriggers) -> Self {
        let Some(key) = TagKey::from_name(name) else {
            self.reject(DiscardReason::UnknownTag, &format!("unknown tag '{name}'"));
            return self;
        };

        let slot = self.record.field_mut(key);
        if let Some(existing) = slot.as_deref() {
            let detail = format!(
                "duplicate tag '{}': '{}' then '{}'",
                key.name(),
                existing,
                value
            );
            log::warn(format!("{detail}; discarding record"));
            self.reject(DiscardReason::DuplicateTag, &detail);
            return self;
        }
        *slot = Some(value.to_string());

        if key == TagKey::Variant && !triggers.is_variant_allowed(value) {
            self.reject(
                DiscardReason::UnsupportedVariant,
                &format!("unsupported variant '{value}'"),
            );
        }
        self
    }

    pub fn with_malformed_tag(mut self, line: &str) -> Self {
        self.reject(
            DiscardReason::MalformedTag,
            &format!("malformed tag line '{line}'"),
        );
        self
    }

    /// Closes the record at its move line.
    pub fn finish(
        mut self,
        moves: &str,
        triggers: &ExclusionTriggers,
    ) -> Result<GameRecord, Discarded> {
        let moves = moves.trim();

        if triggers.is_result_only_line(moves) {
            self.reject(
                DiscardReason::AbandonedGame,
                &format!("move line is only a result '{moves}'"),
            );
        } else if !starts_at_first_move(moves) {
            self.reject(
                DiscardReason::MidGameStart,
                "move line does not start at move 1",
            );
        }

        let sentinels: Vec<String> = self
            .record
            .fields()
            .filter(|(key, value)| triggers.is_sentinel(*key, value))
            .map(|(key, value)| format!("sentinel {}='{}'", key.name(), value))
            .collect();
        for detail in sentinels {
            self.reject(DiscardReason::SentinelValue, &detail);
        }

        for key in REQUIRED_TAGS {
            if self.record.field(key).is_none() {
                self.reject(
                    DiscardReason::MissingTag,
                    &format!("missing tag '{}'", key.name()),
                );
            }
        }

        if let Some(reason) = self.first_problem {
            return Err(Discarded {
                reason,
                detail: self.problems.take().unwrap_or_default(),
                game: self.record.identity(),
            });
        }

        self.record.moves = moves.to_string();
        Ok(self.record)
    }
}

/// Iterator of accepted [`GameRecord`]s over a line stream.
pub struct RecordParser<R> {
    input: R,
    buffer: Vec<u8>,
    builder: RecordBuilder,
    triggers: ExclusionTriggers,
    stats: ParseStats,
    finished: bool,
}

impl<R: BufRead> RecordParser<R> {
    pub fn new(input: R) -> Self {
        Self::with_triggers(input, ExclusionTriggers::default())
    }

    pub fn with_triggers(input: R, triggers: ExclusionTriggers) -> Self {
        Self {
            input,
            buffer: Vec::with_capacity(1024),
            builder: RecordBuilder::new(),
            triggers,
            stats: ParseStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn into_stats(self) -> ParseStats {
        self.stats
    }

    /// Next line, decoded lossily. I/O errors end the stream.
    fn read_line(&mut self) -> Option<String> {
        self.buffer.clear();
        match self.input.read_until(b'\n', &mut self.buffer) {
            Ok(0) => None,
            Ok(_) => {
                self.stats.lines_read += 1;
                let line = String::from_utf8_lossy(&self.buffer);
                Some(line.trim_end_matches(['\r', '\n']).to_string())
            }
            Err(e) => {
                log::warn(format!(
                    "Read error after line {}: {}; treating as end of stream",
                    self.stats.lines_read, e
                ));
                None
            }
        }
    }

    fn discard(&mut self, discarded: Discarded) {
        self.stats.record_discard(discarded.reason);
        if log::debug_enabled() {
            log::debug(format!(
                "Discarded record ({}): {} [{}]",
                discarded.reason.label(),
                discarded.detail,
                discarded.game
            ));
        }
    }

    fn finish_stream(&mut self) {
        self.finished = true;
        let builder = mem::take(&mut self.builder);
        if !builder.is_empty() {
            self.discard(Discarded {
                reason: DiscardReason::IncompleteAtEof,
                detail: "stream ended before the move line".to_string(),
                game: builder.record.identity(),
            });
        }
    }
}

impl<R: BufRead> Iterator for RecordParser<R> {
    type Item = GameRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let Some(line) = self.read_line() else {
                self.finish_stream();
                return None;
            };

            match classify_line(&line, &self.triggers) {
                Line::Blank => {}
                Line::Noise => {
                    self.stats.noise_lines += 1;
                    log::warn(format!(
                        "Unexpected line {}: {}",
                        self.stats.lines_read, line
                    ));
                }
                Line::Tag { name, value } => {
                    let builder = mem::take(&mut self.builder);
                    self.builder = builder.with_tag(name, value, &self.triggers);
                }
                Line::MalformedTag => {
                    let builder = mem::take(&mut self.builder);
                    self.builder = builder.with_malformed_tag(&line);
                }
                Line::Moves(moves) => {
                    if self.builder.is_empty() {
                        self.stats.noise_lines += 1;
                        log::warn(format!(
                            "Move line {} outside a record: {}",
                            self.stats.lines_read, moves
                        ));
                        continue;
                    }

                    let builder = mem::take(&mut self.builder);
                    match builder.finish(moves, &self.triggers) {
                        Ok(record) => {
                            self.stats.records_emitted += 1;
                            return Some(record);
                        }
                        Err(discarded) => self.discard(discarded),
                    }
                }
            }
        }
    }
}
