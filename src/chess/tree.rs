//! Opening tree: games rolled up by shared ply prefix.
//!
//! Nodes live in an arena indexed by [`NodeId`]; the root (index 0) is the
//! empty prefix. Games are recorded on their leaf only, then a single pass in
//! reverse index order adds every node into its parent. Children are always
//! created after their parent, so each node is complete before it is added.

use super::error::IntegrityError;
use super::plies::{PlyDepth, PlySequence};
use super::types::GameOutcome;
use chrono::NaiveDate;

pub type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub occurrences: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    /// Sum of outcome scores; kept at full precision.
    pub outcome_sum: f64,
    pub last_date: Option<NaiveDate>,
}

impl NodeStats {
    fn record(&mut self, outcome: GameOutcome, date: Option<NaiveDate>) {
        self.occurrences += 1;
        match outcome {
            GameOutcome::Win => self.wins += 1,
            GameOutcome::Loss => self.losses += 1,
            GameOutcome::Draw => self.draws += 1,
        }
        self.outcome_sum += outcome.score();
        self.last_date = self.last_date.max(date);
    }

    fn absorb(&mut self, child: &NodeStats) {
        self.occurrences += child.occurrences;
        self.wins += child.wins;
        self.losses += child.losses;
        self.draws += child.draws;
        self.outcome_sum += child.outcome_sum;
        self.last_date = self.last_date.max(child.last_date);
    }

    /// Mean outcome score; 0 for an empty node.
    pub fn avg_result(&self) -> f64 {
        if self.occurrences == 0 {
            0.0
        } else {
            self.outcome_sum / self.occurrences as f64
        }
    }
}

/// One aggregated game: its ply path, the player's outcome and the date.
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningGame {
    pub plies: PlySequence,
    pub outcome: GameOutcome,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
struct TreeNode {
    token: Option<String>,
    parent: Option<NodeId>,
    depth: usize,
    children: Vec<NodeId>,
    stats: NodeStats,
}

impl TreeNode {
    fn new(token: Option<String>, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            token,
            parent,
            depth,
            children: Vec::new(),
            stats: NodeStats::default(),
        }
    }
}

/// Collects leaf statistics; [`OpeningTreeBuilder::finish`] rolls them up.
#[derive(Debug, Clone)]
pub struct OpeningTreeBuilder {
    nodes: Vec<TreeNode>,
    depth: PlyDepth,
}

impl OpeningTreeBuilder {
    pub fn new(depth: PlyDepth) -> Self {
        Self {
            nodes: vec![TreeNode::new(None, None, 0)],
            depth,
        }
    }

    fn child(&mut self, parent: NodeId, token: &str) -> NodeId {
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&id| self.nodes[id].token.as_deref() == Some(token));
        if let Some(id) = existing {
            return id;
        }

        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes
            .push(TreeNode::new(Some(token.to_string()), Some(parent), depth));
        self.nodes[parent].children.push(id);
        id
    }

    /// Records a game on its leaf. Every path must be exactly as deep as the
    /// tree, otherwise statistics would land on an inner node.
    pub fn add(&mut self, game: &OpeningGame) -> Result<(), IntegrityError> {
        let expected = self.depth.plies();
        if game.plies.len() != expected {
            return Err(IntegrityError::PathLength {
                path: game.plies.joined(),
                plies: game.plies.len(),
                expected,
            });
        }

        let mut node = ROOT;
        for token in game.plies.tokens() {
            node = self.child(node, token);
        }
        self.nodes[node].stats.record(game.outcome, game.date);
        Ok(())
    }

    pub fn finish(mut self) -> Result<OpeningTree, IntegrityError> {
        for id in (1..self.nodes.len()).rev() {
            let stats = self.nodes[id].stats.clone();
            if let Some(parent) = self.nodes[id].parent {
                self.nodes[parent].stats.absorb(&stats);
            }
        }

        let mut tree = OpeningTree {
            nodes: self.nodes,
            depth: self.depth,
        };
        tree.sort_children();
        tree.verify()?;
        Ok(tree)
    }
}

/// Presentation row for one tree node. Percentages and the average result
/// are rounded to two decimals; counts are exact.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRow {
    pub depth: usize,
    pub path: Vec<String>,
    pub id: String,
    pub parent_id: Option<String>,
    pub occurrences: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub avg_result: f64,
    pub last_date: Option<NaiveDate>,
    pub percent_of_parent: Option<f64>,
    pub percent_of_total: f64,
}

impl TreeRow {
    pub fn path_json(&self) -> String {
        serde_json::to_string(&self.path).unwrap_or_else(|_| "[]".to_string())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

#[derive(Debug, Clone)]
pub struct OpeningTree {
    nodes: Vec<TreeNode>,
    depth: PlyDepth,
}

impl OpeningTree {
    pub fn build<'a, I>(depth: PlyDepth, games: I) -> Result<Self, IntegrityError>
    where
        I: IntoIterator<Item = &'a OpeningGame>,
    {
        let mut builder = OpeningTreeBuilder::new(depth);
        for game in games {
            builder.add(game)?;
        }
        builder.finish()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().occurrences == 0
    }

    pub fn root(&self) -> &NodeStats {
        &self.nodes[ROOT].stats
    }

    /// Statistics for the node at `prefix`, if any game reached it.
    #[cfg(test)]
    pub fn stats(&self, prefix: &[&str]) -> Option<&NodeStats> {
        let mut node = ROOT;
        for token in prefix {
            node = self.nodes[node]
                .children
                .iter()
                .copied()
                .find(|&id| self.nodes[id].token.as_deref() == Some(*token))?;
        }
        Some(&self.nodes[node].stats)
    }

    fn sort_children(&mut self) {
        for id in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[id].children);
            children.sort_by(|&a, &b| {
                let (a, b) = (&self.nodes[a], &self.nodes[b]);
                b.stats
                    .occurrences
                    .cmp(&a.stats.occurrences)
                    .then_with(|| a.token.cmp(&b.token))
            });
            self.nodes[id].children = children;
        }
    }

    fn prefix(&self, id: NodeId) -> Vec<String> {
        let mut path = Vec::with_capacity(self.nodes[id].depth);
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(token) = &self.nodes[current].token {
                path.push(token.clone());
            }
            cursor = self.nodes[current].parent;
        }
        path.reverse();
        path
    }

    /// Re-checks the branch-value invariants of the rolled-up tree.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let leaf_depth = self.depth.plies();
        for (id, node) in self.nodes.iter().enumerate() {
            let stats = &node.stats;
            let mismatch = |detail: String| IntegrityError::BranchMismatch {
                node: self.prefix(id).join(" "),
                detail,
            };

            if stats.wins + stats.losses + stats.draws != stats.occurrences {
                return Err(mismatch(format!(
                    "wins {} + losses {} + draws {} != occurrences {}",
                    stats.wins, stats.losses, stats.draws, stats.occurrences
                )));
            }

            if node.children.is_empty() {
                if id != ROOT && node.depth != leaf_depth {
                    return Err(mismatch(format!(
                        "leaf at depth {} but the tree is {} plies deep",
                        node.depth, leaf_depth
                    )));
                }
                continue;
            }

            let child_sum: u64 = node
                .children
                .iter()
                .map(|&child| self.nodes[child].stats.occurrences)
                .sum();
            if child_sum != stats.occurrences {
                return Err(mismatch(format!(
                    "occurrences {} != sum of children {}",
                    stats.occurrences, child_sum
                )));
            }
        }
        Ok(())
    }

    /// All nodes in depth-first pre-order, children by descending occurrences.
    pub fn rows(&self) -> Vec<TreeRow> {
        let total = self.root().occurrences;
        let mut rows = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            let path = self.prefix(id);
            let parent = node.parent.map(|parent| &self.nodes[parent]);

            rows.push(TreeRow {
                depth: node.depth,
                id: path.join(" "),
                parent_id: node.parent.map(|_| path[..path.len() - 1].join(" ")),
                path,
                occurrences: node.stats.occurrences,
                wins: node.stats.wins,
                losses: node.stats.losses,
                draws: node.stats.draws,
                avg_result: round2(node.stats.avg_result()),
                last_date: node.stats.last_date,
                percent_of_parent: parent
                    .map(|parent| round2(percentage(node.stats.occurrences, parent.stats.occurrences))),
                percent_of_total: round2(percentage(node.stats.occurrences, total)),
            });

            stack.extend(node.children.iter().rev().copied());
        }

        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::plies::expand_plies;

    fn game(moves: &str, depth: PlyDepth, outcome: GameOutcome, date: Option<(i32, u32, u32)>) -> OpeningGame {
        OpeningGame {
            plies: expand_plies(moves, depth).unwrap(),
            outcome,
            date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        }
    }

    fn depth(moves: i64) -> PlyDepth {
        PlyDepth::new(moves).unwrap()
    }

    fn sample_games() -> Vec<OpeningGame> {
        let d = depth(2);
        vec![
            game("1. e4 e5 2. Nf3 Nc6 1-0", d, GameOutcome::Win, Some((2022, 1, 1))),
            game("1. e4 e5 2. Nf3 Nf6 0-1", d, GameOutcome::Loss, Some((2022, 3, 1))),
            game("1. e4 e5 2. Bc4 Nf6 1/2-1/2", d, GameOutcome::Draw, None),
            game("1. e4 c5 2. Nf3 d6 1-0", d, GameOutcome::Win, Some((2021, 6, 1))),
            game("1. d4 d5 2. c4 e6 1-0", d, GameOutcome::Win, Some((2022, 2, 1))),
        ]
    }

    #[test]
    fn test_shared_prefix_node_statistics() {
        let d = depth(1);
        let games = vec![
            game("1. e4 e5 2. Nf3 1-0", d, GameOutcome::Win, None),
            game("1. e4 e5 2. d4 0-1", d, GameOutcome::Loss, None),
        ];
        let tree = OpeningTree::build(d, &games).unwrap();

        let node = tree.stats(&["e4", "e5"]).unwrap();
        assert_eq!(node.occurrences, 2);
        assert_eq!(node.wins, 1);
        assert_eq!(node.losses, 1);
        assert_eq!(node.draws, 0);
        assert_eq!(node.avg_result(), 0.5);
    }

    #[test]
    fn test_root_represents_all_games() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();

        let root = tree.root();
        assert_eq!(root.occurrences, 5);
        assert_eq!(root.wins, 3);
        assert_eq!(root.losses, 1);
        assert_eq!(root.draws, 1);
        assert_eq!(root.last_date, NaiveDate::from_ymd_opt(2022, 3, 1));
        assert!((root.avg_result() - 3.5 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_branch_values_are_additive() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();
        let rows = tree.rows();

        for row in &rows {
            assert_eq!(row.wins + row.losses + row.draws, row.occurrences);
            let children: u64 = rows
                .iter()
                .filter(|r| r.parent_id.as_deref() == Some(row.id.as_str()))
                .map(|r| r.occurrences)
                .sum();
            if row.depth < 4 {
                assert_eq!(children, row.occurrences, "node '{}'", row.id);
            }
        }
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn test_avg_result_is_weighted_mean_of_children() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();

        let e4 = tree.stats(&["e4"]).unwrap();
        let e5 = tree.stats(&["e4", "e5"]).unwrap();
        let c5 = tree.stats(&["e4", "c5"]).unwrap();
        let weighted = (e5.avg_result() * e5.occurrences as f64
            + c5.avg_result() * c5.occurrences as f64)
            / e4.occurrences as f64;
        assert!((e4.avg_result() - weighted).abs() < 1e-12);
    }

    #[test]
    fn test_rows_percentages() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();
        let rows = tree.rows();

        let root = &rows[0];
        assert_eq!(root.id, "");
        assert_eq!(root.depth, 0);
        assert_eq!(root.parent_id, None);
        assert_eq!(root.percent_of_parent, None);
        assert_eq!(root.percent_of_total, 100.0);
        assert_eq!(root.avg_result, 0.7);

        let e4 = rows.iter().find(|r| r.id == "e4").unwrap();
        assert_eq!(e4.parent_id.as_deref(), Some(""));
        assert_eq!(e4.percent_of_parent, Some(80.0));
        assert_eq!(e4.percent_of_total, 80.0);

        let e5 = rows.iter().find(|r| r.id == "e4 e5").unwrap();
        assert_eq!(e5.parent_id.as_deref(), Some("e4"));
        assert_eq!(e5.percent_of_parent, Some(75.0));
        assert_eq!(e5.percent_of_total, 60.0);
        assert_eq!(e5.avg_result, 0.5);

        let nf3 = rows.iter().find(|r| r.id == "e4 e5 Nf3").unwrap();
        assert_eq!(nf3.percent_of_parent, Some(66.67));
        assert_eq!(nf3.percent_of_total, 40.0);
        assert_eq!(nf3.path, vec!["e4", "e5", "Nf3"]);
        assert_eq!(nf3.path_json(), r#"["e4","e5","Nf3"]"#);
    }

    #[test]
    fn test_rows_are_pre_order_by_popularity() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();
        let ids: Vec<String> = tree.rows().into_iter().map(|r| r.id).collect();

        assert_eq!(
            ids,
            vec![
                "",
                "e4",
                "e4 e5",
                "e4 e5 Nf3",
                "e4 e5 Nf3 Nc6",
                "e4 e5 Nf3 Nf6",
                "e4 e5 Bc4",
                "e4 e5 Bc4 Nf6",
                "e4 c5",
                "e4 c5 Nf3",
                "e4 c5 Nf3 d6",
                "d4",
                "d4 d5",
                "d4 d5 c4",
                "d4 d5 c4 e6",
            ]
        );
        assert_eq!(tree.len(), ids.len());
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let games = sample_games();
        let first = OpeningTree::build(depth(2), &games).unwrap().rows();
        let second = OpeningTree::build(depth(2), &games).unwrap().rows();
        assert_eq!(first, second);
    }

    #[test]
    fn test_last_date_is_maximum_over_subtree() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();
        assert_eq!(
            tree.stats(&["e4", "e5"]).unwrap().last_date,
            NaiveDate::from_ymd_opt(2022, 3, 1)
        );
        assert_eq!(
            tree.stats(&["e4", "e5", "Bc4"]).unwrap().last_date,
            None
        );
    }

    #[test]
    fn test_empty_tree_has_only_root() {
        let tree = OpeningTree::build(depth(3), std::iter::empty()).unwrap();
        assert!(tree.is_empty());

        let rows = tree.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].occurrences, 0);
        assert_eq!(rows[0].percent_of_total, 0.0);
        assert_eq!(rows[0].avg_result, 0.0);
    }

    #[test]
    fn test_unknown_prefix_has_no_stats() {
        let games = sample_games();
        let tree = OpeningTree::build(depth(2), &games).unwrap();
        assert!(tree.stats(&["c4"]).is_none());
        assert_eq!(tree.stats(&[]).unwrap().occurrences, 5);
    }

    #[test]
    fn test_path_of_wrong_length_is_rejected_on_add() {
        let mut builder = OpeningTreeBuilder::new(depth(1));
        let too_deep = game("1. e4 e5 2. Nf3 Nc6 1-0", depth(2), GameOutcome::Win, None);

        let err = builder.add(&too_deep).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::PathLength {
                path: "e4 e5 Nf3 Nc6".to_string(),
                plies: 4,
                expected: 2,
            }
        );
        assert!(err.to_string().contains("'e4 e5 Nf3 Nc6'"));

        let tree = builder.finish().unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_build_stops_at_first_bad_path() {
        let games = vec![
            game("1. e4 e5 2. Nf3 1-0", depth(1), GameOutcome::Win, None),
            game("1. d4 d5 2. c4 e6 0-1", depth(2), GameOutcome::Loss, None),
        ];
        let err = OpeningTree::build(depth(1), &games).unwrap_err();
        assert!(matches!(err, IntegrityError::PathLength { plies: 4, .. }));
    }

    #[test]
    fn test_verify_reports_broken_roll_up() {
        let games = sample_games();
        let mut tree = OpeningTree::build(depth(2), &games).unwrap();
        tree.nodes[1].stats.occurrences += 1;
        tree.nodes[1].stats.wins += 1;

        let err = tree.verify().unwrap_err();
        assert!(matches!(err, IntegrityError::BranchMismatch { .. }));
        assert!(err.to_string().contains("sum of children"));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(50.0), 50.0);
    }
}
