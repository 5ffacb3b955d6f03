#[path = "duckdb/mod.rs"]
mod duckdb_impl;
mod error;
mod exclusion;
mod features;
mod filter;
mod input;
mod log;
mod openings;
mod parser;
mod pipeline;
mod plies;
mod reader;
mod tree;
mod types;

use duckdb::{Connection, Result};
use duckdb_ext_macros::duckdb_extension;
use openings::OpeningTreeVTab;
use plies::ChessPlyPathScalar;
use reader::ReadGameHistoryVTab;
use std::error::Error;

#[duckdb_extension(name = "chess_openings", api_version = "v1.0.0")]
pub unsafe fn extension_entrypoint(con: Connection) -> Result<(), Box<dyn Error>> {
    // Table functions
    con.register_table_function::<ReadGameHistoryVTab>("read_game_history")?;
    con.register_table_function::<OpeningTreeVTab>("opening_tree")?;

    // Scalar functions
    con.register_scalar_function::<ChessPlyPathScalar>("chess_ply_path")?;

    Ok(())
}
