//! FISH binary file module
//!
//! Sequential files of tagged values, used by the engine to hand over bulk
//! results out-of-band. A file is the magic number followed by zero or more
//! frames; the end of the file is the end of the sequence.

mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use crate::protocol::{CodecError, IntLayout, Tag};

/// FISH file errors
#[derive(Error, Debug)]
pub enum FishError {
    #[error("Not a FISH binary file (header {found:?})")]
    BadFileFormat { found: Option<i32> },

    #[error("Writing {0} values to FISH files is not supported")]
    UnsupportedWrite(Tag),

    /// Reading past the last value; ends iteration, not a data error
    #[error("End of FISH file")]
    EndOfSequence,

    #[error("FISH file ends in the middle of a value")]
    Truncated,

    #[error("Expected {expected} values, found {found}")]
    UnexpectedValue { expected: Tag, found: Tag },

    #[error("{0} trailing floats do not form a 3-vector")]
    RaggedTriplets(usize),

    #[error("Format error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FishError {
    pub fn is_end_of_sequence(&self) -> bool {
        matches!(self, FishError::EndOfSequence)
    }
}

pub type FishResult<T> = Result<T, FishError>;

/// Integer layout of a FISH file; fixed per producing engine, never detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLayout {
    /// 4 byte integers
    #[default]
    Standard,
    /// Every integer is followed by a 4 byte zero word
    PaddedInts,
}

impl From<FileLayout> for IntLayout {
    fn from(layout: FileLayout) -> Self {
        match layout {
            FileLayout::Standard => IntLayout::Standard,
            FileLayout::PaddedInts => IntLayout::Padded,
        }
    }
}
