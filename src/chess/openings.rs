use super::{
    duckdb_impl::{bind_info_ffi::get_named_parameter_i64, to_duckdb_date},
    input::{
        HistoryParams, bind_history_params, filter_named_parameters, open_buffered,
        positional_parameters,
    },
    log,
    pipeline::{AnalysisOptions, HistoryAccumulator, HistoryAnalysis, analyze_history},
    plies::PlyDepth,
    reader::{ROWS_PER_CHUNK, lock_state, sanitize_for_cstring},
    tree::TreeRow,
};
use duckdb::{
    core::{DataChunkHandle, FlatVector, Inserter, LogicalTypeHandle, LogicalTypeId},
    vtab::{BindInfo, InitInfo, TableFunctionInfo, VTab},
};
use libduckdb_sys::duckdb_date;
use std::error::Error;
use std::ffi::CString;
use std::sync::Mutex;

#[repr(C)]
pub struct OpeningTreeBindData {
    params: HistoryParams,
    depth: PlyDepth,
}

#[repr(C)]
pub struct OpeningTreeInitData {
    scan: Mutex<TreeScan>,
}

/// The tree is built on the first scan call, then served in chunks.
enum TreeScan {
    Pending,
    Ready { rows: Vec<TreeRow>, next: usize },
}

pub struct OpeningTreeVTab;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TreeLogicalType {
    Varchar,
    UInteger,
    UBigint,
    Double,
    Date,
}

impl TreeLogicalType {
    fn to_handle(self) -> LogicalTypeHandle {
        match self {
            Self::Varchar => LogicalTypeHandle::from(LogicalTypeId::Varchar),
            Self::UInteger => LogicalTypeHandle::from(LogicalTypeId::UInteger),
            Self::UBigint => LogicalTypeHandle::from(LogicalTypeId::UBigint),
            Self::Double => LogicalTypeHandle::from(LogicalTypeId::Double),
            Self::Date => LogicalTypeHandle::from(LogicalTypeId::Date),
        }
    }
}

/// Columns after the `ply_N` block, in output order.
const STAT_COLUMNS: [(&str, TreeLogicalType); 11] = [
    ("id", TreeLogicalType::Varchar),
    ("parent_id", TreeLogicalType::Varchar),
    ("path", TreeLogicalType::Varchar),
    ("occurrences", TreeLogicalType::UBigint),
    ("wins", TreeLogicalType::UBigint),
    ("losses", TreeLogicalType::UBigint),
    ("draws", TreeLogicalType::UBigint),
    ("avg_result", TreeLogicalType::Double),
    ("last_date", TreeLogicalType::Date),
    ("percent_of_parent", TreeLogicalType::Double),
    ("percent_of_total", TreeLogicalType::Double),
];

/// Column layout: `depth`, `ply_1..ply_{2*depth}`, then [`STAT_COLUMNS`].
#[derive(Clone, Copy, Debug)]
struct TreeColumns {
    plies: usize,
}

impl TreeColumns {
    const DEPTH: usize = 0;

    fn new(depth: PlyDepth) -> Self {
        Self {
            plies: depth.plies(),
        }
    }

    fn ply(self, i: usize) -> usize {
        1 + i
    }

    /// Index of the `n`th entry of [`STAT_COLUMNS`].
    fn stat(self, n: usize) -> usize {
        1 + self.plies + n
    }

    fn definitions(self) -> Vec<(String, TreeLogicalType)> {
        let mut columns = Vec::with_capacity(1 + self.plies + STAT_COLUMNS.len());
        columns.push(("depth".to_string(), TreeLogicalType::UInteger));
        columns.extend((1..=self.plies).map(|i| (format!("ply_{i}"), TreeLogicalType::Varchar)));
        columns.extend(
            STAT_COLUMNS
                .iter()
                .map(|(name, logical_type)| (name.to_string(), *logical_type)),
        );
        columns
    }
}

fn resolve_depth(bind: &BindInfo) -> Result<PlyDepth, Box<dyn Error>> {
    match get_named_parameter_i64(bind, "depth")?.into_option() {
        Some(depth) => PlyDepth::new(depth),
        None => Ok(PlyDepth::default()),
    }
}

fn analyze(bind_data: &OpeningTreeBindData) -> Result<HistoryAnalysis, Box<dyn Error>> {
    let params = &bind_data.params;
    let options = AnalysisOptions::new(params.player.clone())
        .with_depth(bind_data.depth)
        .with_filter(params.filter.clone());

    if let [path] = params.paths.as_slice() {
        let input = open_buffered(path, params.compression)?;
        return Ok(analyze_history(input, &options)?);
    }

    let mut accumulator = HistoryAccumulator::new(&options);
    for path in &params.paths {
        match open_buffered(path, params.compression) {
            Ok(input) => {
                accumulator.consume(input)?;
                if log::debug_enabled() {
                    log::debug(format!(
                        "opening_tree: after '{}': {}",
                        path.display(),
                        accumulator.stats().to_json()
                    ));
                }
            }
            Err(err_msg) => log::warn(&err_msg),
        }
    }
    Ok(accumulator.finish()?)
}

fn build_rows(bind_data: &OpeningTreeBindData) -> Result<Vec<TreeRow>, Box<dyn Error>> {
    let HistoryAnalysis { tree, stats } = analyze(bind_data)?;
    if tree.is_empty() {
        log::warn(format!(
            "opening_tree: no games for '{}' reached depth {}: {}",
            bind_data.params.player,
            bind_data.depth.moves(),
            stats.to_json()
        ));
    }
    log::debug(format!("opening_tree: {} nodes", tree.len()));
    Ok(tree.rows())
}

fn write_optional_f64(vector: &mut FlatVector, row: usize, value: Option<f64>) {
    match value {
        Some(value) => vector.as_mut_slice::<f64>()[row] = value,
        None => vector.set_null(row),
    }
}

fn write_optional_varchar(
    vector: &mut FlatVector,
    row: usize,
    value: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    match value {
        Some(value) => vector.insert(row, CString::new(sanitize_for_cstring(value).as_ref())?),
        None => vector.set_null(row),
    }
    Ok(())
}

fn write_tree_row(
    output: &mut DataChunkHandle,
    columns: TreeColumns,
    row: usize,
    tree_row: &TreeRow,
) -> Result<(), Box<dyn Error>> {
    output
        .flat_vector(TreeColumns::DEPTH)
        .as_mut_slice::<u32>()[row] = tree_row.depth as u32;

    for i in 0..columns.plies {
        let mut vector = output.flat_vector(columns.ply(i));
        write_optional_varchar(&mut vector, row, tree_row.path.get(i).map(String::as_str))?;
    }

    write_optional_varchar(
        &mut output.flat_vector(columns.stat(0)),
        row,
        Some(tree_row.id.as_str()),
    )?;
    write_optional_varchar(
        &mut output.flat_vector(columns.stat(1)),
        row,
        tree_row.parent_id.as_deref(),
    )?;
    write_optional_varchar(
        &mut output.flat_vector(columns.stat(2)),
        row,
        Some(tree_row.path_json().as_str()),
    )?;

    let counts = [
        tree_row.occurrences,
        tree_row.wins,
        tree_row.losses,
        tree_row.draws,
    ];
    for (n, count) in counts.into_iter().enumerate() {
        output
            .flat_vector(columns.stat(3 + n))
            .as_mut_slice::<u64>()[row] = count;
    }

    output
        .flat_vector(columns.stat(7))
        .as_mut_slice::<f64>()[row] = tree_row.avg_result;

    let mut last_date = output.flat_vector(columns.stat(8));
    match tree_row.last_date {
        Some(date) => last_date.as_mut_slice::<duckdb_date>()[row] = to_duckdb_date(date),
        None => last_date.set_null(row),
    }

    write_optional_f64(
        &mut output.flat_vector(columns.stat(9)),
        row,
        tree_row.percent_of_parent,
    );
    output
        .flat_vector(columns.stat(10))
        .as_mut_slice::<f64>()[row] = tree_row.percent_of_total;

    Ok(())
}

impl VTab for OpeningTreeVTab {
    type InitData = OpeningTreeInitData;
    type BindData = OpeningTreeBindData;

    fn bind(bind: &BindInfo) -> Result<Self::BindData, Box<dyn Error>> {
        let params = bind_history_params(bind)?;
        let depth = resolve_depth(bind)?;

        for (name, logical_type) in TreeColumns::new(depth).definitions() {
            bind.add_result_column(&name, logical_type.to_handle());
        }

        Ok(OpeningTreeBindData { params, depth })
    }

    fn init(_: &InitInfo) -> Result<Self::InitData, Box<dyn Error>> {
        Ok(OpeningTreeInitData {
            scan: Mutex::new(TreeScan::Pending),
        })
    }

    fn func(
        func: &TableFunctionInfo<Self>,
        output: &mut DataChunkHandle,
    ) -> Result<(), Box<dyn Error>> {
        let init_data = func.get_init_data();
        let bind_data = func.get_bind_data();
        let mut scan = lock_state(&init_data.scan, "opening_tree")?;

        if matches!(*scan, TreeScan::Pending) {
            *scan = TreeScan::Ready {
                rows: build_rows(bind_data)?,
                next: 0,
            };
        }

        let TreeScan::Ready { rows, next } = &mut *scan else {
            return Err("opening_tree: scan state was not initialized".into());
        };

        let columns = TreeColumns::new(bind_data.depth);
        let end = (*next + ROWS_PER_CHUNK).min(rows.len());
        for (row, tree_row) in rows[*next..end].iter().enumerate() {
            write_tree_row(output, columns, row, tree_row)?;
        }
        output.set_len(end - *next);
        *next = end;
        Ok(())
    }

    fn parameters() -> Option<Vec<LogicalTypeHandle>> {
        Some(positional_parameters())
    }

    fn named_parameters() -> Option<Vec<(String, LogicalTypeHandle)>> {
        let mut named = filter_named_parameters();
        named.push((
            "depth".to_string(),
            LogicalTypeHandle::from(LogicalTypeId::Bigint),
        ));
        Some(named)
    }
}
