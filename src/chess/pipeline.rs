//! Batch pipeline: raw lines -> records -> featured records -> ply paths ->
//! opening tree. Each stage reads the previous stage's collection and returns
//! a new one.

use super::error::IntegrityError;
use super::exclusion::ExclusionTriggers;
use super::features::derive_features;
use super::filter::GameFilter;
use super::log;
use super::parser::{ParseStats, RecordParser};
use super::plies::{PlyDepth, expand_plies};
use super::tree::{OpeningGame, OpeningTree};
use super::types::{FeaturedRecord, GameRecord};
use serde_json::json;
use std::io::BufRead;

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub player: String,
    pub depth: PlyDepth,
    pub filter: GameFilter,
    pub triggers: ExclusionTriggers,
}

impl AnalysisOptions {
    pub fn new(player: impl Into<String>) -> Self {
        Self {
            player: player.into(),
            depth: PlyDepth::default(),
            filter: GameFilter::default(),
            triggers: ExclusionTriggers::default(),
        }
    }

    pub fn with_depth(mut self, depth: PlyDepth) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_filter(mut self, filter: GameFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub parse: ParseStats,
    pub featured: u64,
    pub filtered_out: u64,
    pub insufficient_depth: u64,
    pub aggregated: u64,
}

impl PipelineStats {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "parse": self.parse.to_json(),
            "featured": self.featured,
            "filtered_out": self.filtered_out,
            "insufficient_depth": self.insufficient_depth,
            "aggregated": self.aggregated,
        })
    }
}

pub fn parse_records<R: BufRead>(
    input: R,
    triggers: &ExclusionTriggers,
) -> (Vec<GameRecord>, ParseStats) {
    let mut parser = RecordParser::with_triggers(input, triggers.clone());
    let records: Vec<GameRecord> = parser.by_ref().collect();
    (records, parser.into_stats())
}

/// Derives features and applies the game filter. The filter count is the
/// number of featured games that were dropped.
pub fn select_games(
    records: &[GameRecord],
    options: &AnalysisOptions,
) -> Result<(Vec<FeaturedRecord>, u64), IntegrityError> {
    let mut selected = Vec::with_capacity(records.len());
    let mut filtered_out = 0;
    for record in records {
        let featured = derive_features(&options.player, record)?;
        if options.filter.accepts(&featured) {
            selected.push(featured);
        } else {
            filtered_out += 1;
        }
    }
    Ok((selected, filtered_out))
}

/// Expands every game to `depth`; games that end early are counted, not kept.
pub fn expand_games(games: &[FeaturedRecord], depth: PlyDepth) -> (Vec<OpeningGame>, u64) {
    let mut expanded = Vec::with_capacity(games.len());
    let mut insufficient = 0;
    for game in games {
        match expand_plies(&game.raw_moves, depth) {
            Ok(plies) => expanded.push(OpeningGame {
                plies,
                outcome: game.outcome,
                date: game.date,
            }),
            Err(_) => insufficient += 1,
        }
    }
    (expanded, insufficient)
}

#[derive(Debug, Clone)]
pub struct HistoryAnalysis {
    pub tree: OpeningTree,
    pub stats: PipelineStats,
}

/// Runs the pipeline over one or more input streams and aggregates once at
/// the end.
pub struct HistoryAccumulator<'o> {
    options: &'o AnalysisOptions,
    games: Vec<OpeningGame>,
    stats: PipelineStats,
}

impl<'o> HistoryAccumulator<'o> {
    pub fn new(options: &'o AnalysisOptions) -> Self {
        Self {
            options,
            games: Vec::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn consume<R: BufRead>(&mut self, input: R) -> Result<(), IntegrityError> {
        let (records, parse_stats) = parse_records(input, &self.options.triggers);
        self.stats.parse.merge(&parse_stats);

        let (featured, filtered_out) = select_games(&records, self.options)
            .inspect_err(|e| log::error(e.to_string()))?;
        self.stats.featured += featured.len() as u64 + filtered_out;
        self.stats.filtered_out += filtered_out;

        let (expanded, insufficient) = expand_games(&featured, self.options.depth);
        self.stats.insufficient_depth += insufficient;
        self.games.extend(expanded);
        Ok(())
    }

    pub fn finish(mut self) -> Result<HistoryAnalysis, IntegrityError> {
        self.stats.aggregated = self.games.len() as u64;
        let tree = OpeningTree::build(self.options.depth, &self.games)?;
        log::info(format!(
            "Opening tree for '{}' at depth {}: {}",
            self.options.player,
            self.options.depth.moves(),
            self.stats.to_json()
        ));
        Ok(HistoryAnalysis {
            tree,
            stats: self.stats,
        })
    }
}

pub fn analyze_history<R: BufRead>(
    input: R,
    options: &AnalysisOptions,
) -> Result<HistoryAnalysis, IntegrityError> {
    let mut accumulator = HistoryAccumulator::new(options);
    accumulator.consume(input)?;
    accumulator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::filter::ColorFilter;
    use crate::chess::types::GameOutcome;

    fn game(white: &str, black: &str, result: &str, date: &str, moves: &str) -> String {
        format!(
            "[Event \"Rated Blitz game\"]\n[Date \"{date}\"]\n[White \"{white}\"]\n[Black \"{black}\"]\n[Result \"{result}\"]\n[UTCDate \"{date}\"]\n[WhiteElo \"1500\"]\n[BlackElo \"1520\"]\n[Variant \"Standard\"]\n[TimeControl \"300+0\"]\n\n{moves}\n\n"
        )
    }

    fn history() -> String {
        [
            game("me", "a", "1-0", "2022.01.01", "1. e4 e5 2. Nf3 Nc6 1-0"),
            game("b", "me", "1-0", "2022.01.02", "1. e4 e5 2. Nf3 Nf6 1-0"),
            game("me", "c", "1/2-1/2", "2022.01.03", "1. d4 d5 1/2-1/2"),
            "[White \"me\"]\n[Black \"x\"]\n[Result \"1-0\"]\n[Variant \"Crazyhouse\"]\n\n1. e4 e5 1-0\n\n"
                .to_string(),
            game("me", "d", "0-1", "2022.01.04", "1. e4 c5 2. Nf3 d6 0-1"),
        ]
        .concat()
    }

    #[test]
    fn test_end_to_end_depth_one() {
        let options = AnalysisOptions::new("me").with_depth(PlyDepth::new(1).unwrap());
        let analysis = analyze_history(history().as_bytes(), &options).unwrap();

        assert_eq!(analysis.stats.parse.records_emitted, 4);
        assert_eq!(analysis.stats.parse.unsupported_variant, 1);
        assert_eq!(analysis.stats.featured, 4);
        assert_eq!(analysis.stats.insufficient_depth, 0);
        assert_eq!(analysis.stats.aggregated, 4);

        let tree = &analysis.tree;
        assert_eq!(tree.root().occurrences, 4);
        let e4e5 = tree.stats(&["e4", "e5"]).unwrap();
        assert_eq!(e4e5.occurrences, 2);
        assert_eq!(e4e5.wins, 1);
        assert_eq!(e4e5.losses, 1);
        assert_eq!(e4e5.avg_result(), 0.5);
    }

    #[test]
    fn test_short_games_are_counted_not_aggregated() {
        let options = AnalysisOptions::new("me").with_depth(PlyDepth::new(2).unwrap());
        let analysis = analyze_history(history().as_bytes(), &options).unwrap();

        assert_eq!(analysis.stats.insufficient_depth, 1);
        assert_eq!(analysis.stats.aggregated, 3);
        assert!(analysis.tree.stats(&["d4"]).is_none());
        assert_eq!(analysis.tree.root().occurrences, 3);
    }

    #[test]
    fn test_filters_drop_games_before_expansion() {
        let filter = GameFilter {
            color: ColorFilter::White,
            ..GameFilter::default()
        };
        let options = AnalysisOptions::new("me")
            .with_depth(PlyDepth::new(1).unwrap())
            .with_filter(filter);
        let analysis = analyze_history(history().as_bytes(), &options).unwrap();

        assert_eq!(analysis.stats.filtered_out, 1);
        assert_eq!(analysis.stats.aggregated, 3);
        assert_eq!(analysis.tree.stats(&["e4", "e5"]).unwrap().occurrences, 1);
    }

    #[test]
    fn test_wrong_player_is_a_hard_failure() {
        let options = AnalysisOptions::new("someone_else");
        let err = analyze_history(history().as_bytes(), &options).unwrap_err();
        assert!(matches!(err, IntegrityError::PlayerNotInGame { .. }));
    }

    #[test]
    fn test_empty_stream_is_an_empty_result() {
        let options = AnalysisOptions::new("me");
        let analysis = analyze_history(&b""[..], &options).unwrap();

        assert!(analysis.tree.is_empty());
        assert_eq!(analysis.tree.rows().len(), 1);
        assert_eq!(analysis.stats, PipelineStats::default());
    }

    #[test]
    fn test_accumulator_merges_several_streams() {
        let options = AnalysisOptions::new("me").with_depth(PlyDepth::new(1).unwrap());
        let mut accumulator = HistoryAccumulator::new(&options);
        accumulator.consume(history().as_bytes()).unwrap();
        accumulator.consume(history().as_bytes()).unwrap();
        assert_eq!(accumulator.stats().parse.records_emitted, 8);

        let analysis = accumulator.finish().unwrap();
        assert_eq!(analysis.tree.root().occurrences, 8);
        assert_eq!(analysis.stats.parse.unsupported_variant, 2);
    }

    #[test]
    fn test_stage_functions_compose() {
        let (records, stats) = parse_records(history().as_bytes(), &ExclusionTriggers::default());
        assert_eq!(records.len(), 4);
        assert_eq!(stats.discarded(), 1);

        let options = AnalysisOptions::new("me");
        let (featured, filtered_out) = select_games(&records, &options).unwrap();
        assert_eq!(filtered_out, 0);
        assert_eq!(featured[1].outcome, GameOutcome::Loss);

        let (expanded, insufficient) = expand_games(&featured, PlyDepth::new(2).unwrap());
        assert_eq!(expanded.len(), 3);
        assert_eq!(insufficient, 1);
        assert!(expanded.iter().all(|g| g.plies.len() == 4));
    }

    #[test]
    fn test_stats_json_shape() {
        let options = AnalysisOptions::new("me").with_depth(PlyDepth::new(1).unwrap());
        let analysis = analyze_history(history().as_bytes(), &options).unwrap();
        let json = analysis.stats.to_json();

        assert_eq!(json["aggregated"], 4);
        assert_eq!(json["parse"]["discard_reasons"]["unsupported_variant"], 1);
    }
}
