use super::{
    duckdb_impl::to_duckdb_date,
    features::derive_features,
    filter::GameFilter,
    input::{
        CompressionMode, HistoryParams, PgnInput, bind_history_params, filter_named_parameters,
        open_buffered, positional_parameters,
    },
    log,
    parser::RecordParser,
    types::FeaturedRecord,
};
use duckdb::{
    core::{DataChunkHandle, Inserter, LogicalTypeHandle, LogicalTypeId},
    vtab::{BindInfo, InitInfo, TableFunctionInfo, VTab},
};
use libduckdb_sys::duckdb_date;
use serde_json::json;
use shakmaty::Color;
use std::borrow::Cow;
use std::error::Error;
use std::ffi::CString;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[repr(C)]
pub struct ReadGameHistoryBindData {
    paths: Vec<PathBuf>,
    player: String,
    compression: CompressionMode,
    filter: GameFilter,
}

impl From<HistoryParams> for ReadGameHistoryBindData {
    fn from(params: HistoryParams) -> Self {
        Self {
            paths: params.paths,
            player: params.player,
            compression: params.compression,
            filter: params.filter,
        }
    }
}

#[repr(C)]
pub struct ReadGameHistoryInitData {
    state: Mutex<SharedState>,
}

pub struct ReadGameHistoryVTab;

pub(crate) const ROWS_PER_CHUNK: usize = 2048;
const READ_GAME_HISTORY_COLUMN_COUNT: usize = 18;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HistoryColumn {
    Site = 0,
    UtcDate = 1,
    White = 2,
    Black = 3,
    Result = 4,
    PlayerColor = 5,
    Opponent = 6,
    PlayerRating = 7,
    OpponentRating = 8,
    Outcome = 9,
    Score = 10,
    Rated = 11,
    TimeControl = 12,
    Speed = 13,
    Eco = 14,
    Termination = 15,
    Movetext = 16,
    Source = 17,
}

impl HistoryColumn {
    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HistoryLogicalType {
    Varchar,
    UInteger,
    Double,
    Boolean,
    Date,
}

impl HistoryLogicalType {
    fn to_handle(self) -> LogicalTypeHandle {
        match self {
            Self::Varchar => LogicalTypeHandle::from(LogicalTypeId::Varchar),
            Self::UInteger => LogicalTypeHandle::from(LogicalTypeId::UInteger),
            Self::Double => LogicalTypeHandle::from(LogicalTypeId::Double),
            Self::Boolean => LogicalTypeHandle::from(LogicalTypeId::Boolean),
            Self::Date => LogicalTypeHandle::from(LogicalTypeId::Date),
        }
    }
}

struct HistoryColumnDef {
    name: &'static str,
    logical_type: HistoryLogicalType,
}

const fn column(name: &'static str, logical_type: HistoryLogicalType) -> HistoryColumnDef {
    HistoryColumnDef { name, logical_type }
}

const READ_GAME_HISTORY_COLUMNS: [HistoryColumnDef; READ_GAME_HISTORY_COLUMN_COUNT] = [
    column("Site", HistoryLogicalType::Varchar),
    column("UTCDate", HistoryLogicalType::Date),
    column("White", HistoryLogicalType::Varchar),
    column("Black", HistoryLogicalType::Varchar),
    column("Result", HistoryLogicalType::Varchar),
    column("player_color", HistoryLogicalType::Varchar),
    column("opponent", HistoryLogicalType::Varchar),
    column("player_rating", HistoryLogicalType::UInteger),
    column("opponent_rating", HistoryLogicalType::UInteger),
    column("outcome", HistoryLogicalType::Varchar),
    column("score", HistoryLogicalType::Double),
    column("rated", HistoryLogicalType::Boolean),
    column("TimeControl", HistoryLogicalType::Varchar),
    column("speed", HistoryLogicalType::Varchar),
    column("ECO", HistoryLogicalType::Varchar),
    column("Termination", HistoryLogicalType::Varchar),
    column("movetext", HistoryLogicalType::Varchar),
    column("Source", HistoryLogicalType::Varchar),
];

pub(crate) fn color_name(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

/// DuckDB strings cannot carry interior NULs.
pub(crate) fn sanitize_for_cstring(value: &str) -> Cow<'_, str> {
    if value.contains('\0') {
        Cow::Owned(value.replace('\0', " "))
    } else {
        Cow::Borrowed(value)
    }
}

pub(crate) fn lock_state<'a, T>(
    state: &'a Mutex<T>,
    function: &str,
) -> Result<MutexGuard<'a, T>, Box<dyn Error>> {
    state
        .lock()
        .map_err(|_| format!("{function}: scan state poisoned by an earlier panic").into())
}

struct HistoryReaderState {
    parser: RecordParser<BufReader<PgnInput>>,
    path_idx: usize,
    featured: u64,
    filtered_out: u64,
}

impl HistoryReaderState {
    fn new(input: BufReader<PgnInput>, path_idx: usize) -> Self {
        Self {
            parser: RecordParser::new(input),
            path_idx,
            featured: 0,
            filtered_out: 0,
        }
    }

    /// Next featured record that passes the filter; `None` at end of stream.
    fn next_game(
        &mut self,
        bind_data: &ReadGameHistoryBindData,
    ) -> Result<Option<FeaturedRecord>, Box<dyn Error>> {
        for record in self.parser.by_ref() {
            let featured = derive_features(&bind_data.player, &record)
                .inspect_err(|e| log::error(e.to_string()))?;
            self.featured += 1;
            if bind_data.filter.accepts(&featured) {
                return Ok(Some(featured));
            }
            self.filtered_out += 1;
        }
        Ok(None)
    }

    fn log_summary(&self, source: &Path) {
        log::info(format!(
            "Finished '{}': {}",
            source.display(),
            json!({
                "parse": self.parser.stats().to_json(),
                "featured": self.featured,
                "filtered_out": self.filtered_out,
            })
        ));
    }
}

struct SharedState {
    next_path_idx: usize,
    available_readers: Vec<HistoryReaderState>,
}

struct ChunkWriter<'a> {
    output: &'a mut DataChunkHandle,
    row_count: usize,
}

impl<'a> ChunkWriter<'a> {
    fn new(output: &'a mut DataChunkHandle) -> Self {
        Self {
            output,
            row_count: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.row_count >= ROWS_PER_CHUNK
    }

    fn write_row(&mut self, game: &FeaturedRecord, source: &Path) -> Result<(), Box<dyn Error>> {
        let row = self.row_count;

        self.write_optional_varchar(HistoryColumn::Site, row, game.site.as_deref())?;
        let mut date_vec = self.output.flat_vector(HistoryColumn::UtcDate.index());
        match game.date {
            Some(date) => date_vec.as_mut_slice::<duckdb_date>()[row] = to_duckdb_date(date),
            None => date_vec.set_null(row),
        }
        self.write_varchar(HistoryColumn::White, row, &game.white)?;
        self.write_varchar(HistoryColumn::Black, row, &game.black)?;
        self.write_varchar(HistoryColumn::Result, row, &game.result)?;
        self.write_varchar(HistoryColumn::PlayerColor, row, color_name(game.player_color))?;
        self.write_varchar(HistoryColumn::Opponent, row, &game.opponent)?;
        self.write_optional_uinteger(HistoryColumn::PlayerRating, row, game.player_rating);
        self.write_optional_uinteger(HistoryColumn::OpponentRating, row, game.opponent_rating);
        self.write_varchar(HistoryColumn::Outcome, row, game.outcome.name())?;
        self.output
            .flat_vector(HistoryColumn::Score.index())
            .as_mut_slice::<f64>()[row] = game.outcome.score();
        self.output
            .flat_vector(HistoryColumn::Rated.index())
            .as_mut_slice::<bool>()[row] = game.rated;
        let time_control = game.time_control.map(|tc| tc.to_string());
        self.write_optional_varchar(HistoryColumn::TimeControl, row, time_control.as_deref())?;
        self.write_optional_varchar(
            HistoryColumn::Speed,
            row,
            game.speed.map(|speed| speed.name()),
        )?;
        self.write_optional_varchar(HistoryColumn::Eco, row, game.eco.as_deref())?;
        self.write_optional_varchar(
            HistoryColumn::Termination,
            row,
            game.termination.as_deref(),
        )?;
        self.write_varchar(HistoryColumn::Movetext, row, &game.raw_moves)?;
        self.write_varchar(
            HistoryColumn::Source,
            row,
            source.to_string_lossy().as_ref(),
        )?;

        self.row_count += 1;
        Ok(())
    }

    fn set_output_len(&mut self) {
        self.output.set_len(self.row_count);
    }

    fn write_varchar(
        &mut self,
        column: HistoryColumn,
        row: usize,
        value: &str,
    ) -> Result<(), Box<dyn Error>> {
        let vector = self.output.flat_vector(column.index());
        vector.insert(row, CString::new(sanitize_for_cstring(value).as_ref())?);
        Ok(())
    }

    fn write_optional_varchar(
        &mut self,
        column: HistoryColumn,
        row: usize,
        value: Option<&str>,
    ) -> Result<(), Box<dyn Error>> {
        match value {
            Some(value) => self.write_varchar(column, row, value),
            None => {
                self.output.flat_vector(column.index()).set_null(row);
                Ok(())
            }
        }
    }

    fn write_optional_uinteger(&mut self, column: HistoryColumn, row: usize, value: Option<u32>) {
        let mut vector = self.output.flat_vector(column.index());
        match value {
            Some(value) => vector.as_mut_slice::<u32>()[row] = value,
            None => vector.set_null(row),
        }
    }
}

fn acquire_reader(
    init_data: &ReadGameHistoryInitData,
    bind_data: &ReadGameHistoryBindData,
) -> Result<Option<HistoryReaderState>, Box<dyn Error>> {
    loop {
        let path_idx = {
            let mut state = lock_state(&init_data.state, "read_game_history")?;

            if let Some(reader) = state.available_readers.pop() {
                return Ok(Some(reader));
            }

            if state.next_path_idx < bind_data.paths.len() {
                let path_idx = state.next_path_idx;
                state.next_path_idx += 1;
                path_idx
            } else {
                return Ok(None);
            }
        };

        let path = &bind_data.paths[path_idx];
        match open_buffered(path, bind_data.compression) {
            Ok(input) => return Ok(Some(HistoryReaderState::new(input, path_idx))),
            Err(err_msg) => {
                if bind_data.paths.len() == 1 {
                    return Err(err_msg.into());
                }
                log::warn(&err_msg);
            }
        }
    }
}

fn finalize_chunk(
    init_data: &ReadGameHistoryInitData,
    current_reader: Option<HistoryReaderState>,
    chunk_writer: &mut ChunkWriter<'_>,
) -> Result<(), Box<dyn Error>> {
    if let Some(reader) = current_reader {
        lock_state(&init_data.state, "read_game_history")?
            .available_readers
            .push(reader);
    }

    chunk_writer.set_output_len();
    Ok(())
}

impl VTab for ReadGameHistoryVTab {
    type InitData = ReadGameHistoryInitData;
    type BindData = ReadGameHistoryBindData;

    fn bind(bind: &BindInfo) -> Result<Self::BindData, Box<dyn Error>> {
        let params = bind_history_params(bind)?;

        for column in READ_GAME_HISTORY_COLUMNS.iter() {
            bind.add_result_column(column.name, column.logical_type.to_handle());
        }

        Ok(params.into())
    }

    fn init(_: &InitInfo) -> Result<Self::InitData, Box<dyn Error>> {
        Ok(ReadGameHistoryInitData {
            state: Mutex::new(SharedState {
                next_path_idx: 0,
                available_readers: Vec::new(),
            }),
        })
    }

    fn func(
        func: &TableFunctionInfo<Self>,
        output: &mut DataChunkHandle,
    ) -> Result<(), Box<dyn Error>> {
        let init_data = func.get_init_data();
        let bind_data = func.get_bind_data();
        let mut chunk_writer = ChunkWriter::new(output);
        let mut current_reader: Option<HistoryReaderState> = None;

        while !chunk_writer.is_full() {
            if current_reader.is_none() {
                current_reader = acquire_reader(init_data, bind_data)?;
                if current_reader.is_none() {
                    break;
                }
            }

            if let Some(mut reader) = current_reader.take() {
                let source = &bind_data.paths[reader.path_idx];
                match reader.next_game(bind_data)? {
                    Some(game) => {
                        chunk_writer.write_row(&game, source)?;
                        current_reader = Some(reader);
                    }
                    // Exhausted readers are dropped; the loop picks up the next file.
                    None => reader.log_summary(source),
                }
            }
        }

        finalize_chunk(init_data, current_reader, &mut chunk_writer)
    }

    fn parameters() -> Option<Vec<LogicalTypeHandle>> {
        Some(positional_parameters())
    }

    fn named_parameters() -> Option<Vec<(String, LogicalTypeHandle)>> {
        Some(filter_named_parameters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::filter::ColorFilter;

    #[test]
    fn test_read_game_history_columns_match_contract() {
        let expected: [(&str, HistoryLogicalType); READ_GAME_HISTORY_COLUMN_COUNT] = [
            ("Site", HistoryLogicalType::Varchar),
            ("UTCDate", HistoryLogicalType::Date),
            ("White", HistoryLogicalType::Varchar),
            ("Black", HistoryLogicalType::Varchar),
            ("Result", HistoryLogicalType::Varchar),
            ("player_color", HistoryLogicalType::Varchar),
            ("opponent", HistoryLogicalType::Varchar),
            ("player_rating", HistoryLogicalType::UInteger),
            ("opponent_rating", HistoryLogicalType::UInteger),
            ("outcome", HistoryLogicalType::Varchar),
            ("score", HistoryLogicalType::Double),
            ("rated", HistoryLogicalType::Boolean),
            ("TimeControl", HistoryLogicalType::Varchar),
            ("speed", HistoryLogicalType::Varchar),
            ("ECO", HistoryLogicalType::Varchar),
            ("Termination", HistoryLogicalType::Varchar),
            ("movetext", HistoryLogicalType::Varchar),
            ("Source", HistoryLogicalType::Varchar),
        ];

        for (idx, column) in READ_GAME_HISTORY_COLUMNS.iter().enumerate() {
            assert_eq!(column.name, expected[idx].0);
            assert_eq!(column.logical_type, expected[idx].1);
        }
    }

    #[test]
    fn test_column_enum_indexes_its_definition() {
        assert_eq!(READ_GAME_HISTORY_COLUMNS[HistoryColumn::UtcDate.index()].name, "UTCDate");
        assert_eq!(READ_GAME_HISTORY_COLUMNS[HistoryColumn::Rated.index()].name, "rated");
        assert_eq!(READ_GAME_HISTORY_COLUMNS[HistoryColumn::Source.index()].name, "Source");
    }

    #[test]
    fn test_rows_per_chunk_constant_matches_contract() {
        assert_eq!(ROWS_PER_CHUNK, 2048);
    }

    #[test]
    fn test_sanitize_for_cstring() {
        assert_eq!(sanitize_for_cstring("1. e4 e5").as_ref(), "1. e4 e5");
        assert!(matches!(sanitize_for_cstring("clean"), Cow::Borrowed(_)));
        assert_eq!(sanitize_for_cstring("A\0B").as_ref(), "A B");
    }

    #[test]
    fn test_lock_state_reports_poisoning() {
        let state = Mutex::new(0_u32);
        assert_eq!(*lock_state(&state, "test").unwrap(), 0);

        let _ = std::panic::catch_unwind(|| {
            let _guard = state.lock().unwrap();
            panic!("poison");
        });
        let err = lock_state(&state, "read_game_history").err().unwrap();
        assert!(err.to_string().contains("read_game_history"));
    }

    #[test]
    fn test_reader_state_streams_filtered_games() {
        let pgn = "[White \"me\"]\n[Black \"a\"]\n[Result \"1-0\"]\n\n1. e4 e5 1-0\n\n\
                   [White \"b\"]\n[Black \"me\"]\n[Result \"1-0\"]\n\n1. d4 d5 1-0\n";
        let input: PgnInput = Box::new(std::io::Cursor::new(pgn.as_bytes().to_vec()));
        let mut reader = HistoryReaderState::new(BufReader::new(input), 0);
        let bind_data = ReadGameHistoryBindData {
            paths: vec![PathBuf::from("me.pgn")],
            player: "me".to_string(),
            compression: CompressionMode::Plain,
            filter: GameFilter {
                color: ColorFilter::Black,
                ..GameFilter::default()
            },
        };

        let game = reader.next_game(&bind_data).unwrap().unwrap();
        assert_eq!(game.opponent, "b");
        assert_eq!(color_name(game.player_color), "black");
        assert!(reader.next_game(&bind_data).unwrap().is_none());
        assert_eq!(reader.featured, 2);
        assert_eq!(reader.filtered_out, 1);
    }
}
