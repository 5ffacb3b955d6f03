//! Game-history inputs and the bind-time parameters shared by the table
//! functions.

use super::duckdb_impl::bind_info_ffi::get_named_parameter_varchar;
use super::filter::{ColorFilter, GameFilter, ModeFilter, SpeedSet, parse_date_bound};
use duckdb::{
    core::{LogicalTypeHandle, LogicalTypeId},
    vtab::BindInfo,
};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use zstd::stream::read::Decoder as ZstdDecoder;

pub type PgnInput = Box<dyn Read + Send>;

pub const PATH_PARAM_INDEX: u64 = 0;
pub const PLAYER_PARAM_INDEX: u64 = 1;

/// Named parameters accepted by every game-history table function.
pub const FILTER_PARAMETERS: [&str; 7] = [
    "compression",
    "color",
    "mode",
    "opponent",
    "since",
    "until",
    "speeds",
];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CompressionMode {
    #[default]
    Plain,
    Zstd,
}

impl CompressionMode {
    pub fn parse(raw: &str) -> Result<Self, Box<dyn Error>> {
        let normalized = raw.trim();
        if normalized.eq_ignore_ascii_case("null") {
            return Ok(Self::Plain);
        }
        if normalized.eq_ignore_ascii_case("zstd") {
            return Ok(Self::Zstd);
        }
        Err(format!(
            "Invalid compression value '{normalized}'. Supported values: 'zstd' or NULL/omitted."
        )
        .into())
    }
}

/// Everything bind learns about the inputs and the game selection.
#[derive(Clone, Debug)]
pub struct HistoryParams {
    pub paths: Vec<PathBuf>,
    pub player: String,
    pub compression: CompressionMode,
    pub filter: GameFilter,
}

/// Raw named-parameter values, before validation.
#[derive(Clone, Debug, Default)]
pub struct RawFilterArgs {
    pub compression: Option<String>,
    pub color: Option<String>,
    pub mode: Option<String>,
    pub opponent: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub speeds: Option<String>,
}

impl RawFilterArgs {
    fn read(bind: &BindInfo) -> Result<Self, Box<dyn Error>> {
        let get = |name: &str| -> Result<Option<String>, Box<dyn Error>> {
            Ok(get_named_parameter_varchar(bind, name)?.into_option())
        };
        Ok(Self {
            compression: get("compression")?,
            color: get("color")?,
            mode: get("mode")?,
            opponent: get("opponent")?,
            since: get("since")?,
            until: get("until")?,
            speeds: get("speeds")?,
        })
    }

    pub fn compression(&self) -> Result<CompressionMode, Box<dyn Error>> {
        self.compression
            .as_deref()
            .map_or(Ok(CompressionMode::Plain), CompressionMode::parse)
    }

    pub fn filter(&self) -> Result<GameFilter, Box<dyn Error>> {
        let filter = GameFilter {
            color: self
                .color
                .as_deref()
                .map_or(Ok(ColorFilter::Both), ColorFilter::parse)?,
            mode: self
                .mode
                .as_deref()
                .map_or(Ok(ModeFilter::Both), ModeFilter::parse)?,
            opponent: self
                .opponent
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            since: self
                .since
                .as_deref()
                .map(|raw| parse_date_bound("since", raw))
                .transpose()?,
            until: self
                .until
                .as_deref()
                .map(|raw| parse_date_bound("until", raw))
                .transpose()?,
            speeds: self
                .speeds
                .as_deref()
                .map_or(Ok(SpeedSet::default()), SpeedSet::parse)?,
        };
        filter.validate()?;
        Ok(filter)
    }
}

pub fn parse_player(raw: &str) -> Result<String, Box<dyn Error>> {
    let player = raw.trim();
    if player.is_empty() {
        return Err(
            "Invalid player value ''. Provide the Lichess username the export belongs to.".into(),
        );
    }
    Ok(player.to_string())
}

/// A pattern containing `*` or `?` is globbed; anything else is one file.
pub fn expand_paths(pattern: &str) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if pattern.contains('*') || pattern.contains('?') {
        Ok(glob::glob(pattern)?.filter_map(|entry| entry.ok()).collect())
    } else {
        Ok(vec![PathBuf::from(pattern)])
    }
}

pub fn bind_history_params(bind: &BindInfo) -> Result<HistoryParams, Box<dyn Error>> {
    let pattern = bind.get_parameter(PATH_PARAM_INDEX).to_string();
    let player = parse_player(&bind.get_parameter(PLAYER_PARAM_INDEX).to_string())?;
    let args = RawFilterArgs::read(bind)?;

    Ok(HistoryParams {
        paths: expand_paths(&pattern)?,
        player,
        compression: args.compression()?,
        filter: args.filter()?,
    })
}

pub fn positional_parameters() -> Vec<LogicalTypeHandle> {
    vec![
        LogicalTypeHandle::from(LogicalTypeId::Varchar), // path or glob
        LogicalTypeHandle::from(LogicalTypeId::Varchar), // player
    ]
}

pub fn filter_named_parameters() -> Vec<(String, LogicalTypeHandle)> {
    FILTER_PARAMETERS
        .iter()
        .map(|name| {
            (
                name.to_string(),
                LogicalTypeHandle::from(LogicalTypeId::Varchar),
            )
        })
        .collect()
}

pub fn open_input_stream(path: &Path, compression: CompressionMode) -> Result<PgnInput, String> {
    let file =
        File::open(path).map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

    match compression {
        CompressionMode::Plain => Ok(Box::new(file)),
        CompressionMode::Zstd => ZstdDecoder::new(file)
            .map(|decoder| Box::new(decoder) as PgnInput)
            .map_err(|e| {
                format!(
                    "Failed to initialize zstd decoder for '{}': {}",
                    path.display(),
                    e
                )
            }),
    }
}

pub fn open_buffered(
    path: &Path,
    compression: CompressionMode,
) -> Result<BufReader<PgnInput>, String> {
    open_input_stream(path, compression).map(BufReader::new)
}
