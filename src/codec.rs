//! The closed set of serialization codecs.
//!
//! Every persisted artifact of a submission (plans, work descriptors, graph
//! dumps and saved generic workflows) goes through a [`Format`]. Format names
//! coming from configuration are parsed with [`str::parse`], which is the only
//! place an unknown name can surface, as [`WorkflowError::UnsupportedFormat`].

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::str::FromStr;

use camino::Utf8Path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, WorkflowError};

/// Serialization codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// CBOR, lossless for every type in the crate.
    #[default]
    #[serde(alias = "cbor")]
    Native,
    /// Pretty printed JSON, handy for inspection.
    Json,
}

impl Format {
    /// File extension used for files written in this format.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Native => "cbor",
            Format::Json => "json",
        }
    }

    /// Guess the format from a file extension, falling back to `Native`.
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension() {
            Some("json") => Format::Json,
            _ => Format::Native,
        }
    }

    pub fn encode<T, W>(self, value: &T, writer: W) -> Result<(), CodecError>
    where
        T: Serialize + ?Sized,
        W: Write,
    {
        match self {
            Format::Native => ciborium::into_writer(value, writer)?,
            Format::Json => serde_json::to_writer_pretty(writer, value)?,
        }

        Ok(())
    }

    pub fn decode<T, R>(self, reader: R) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
        R: Read,
    {
        Ok(match self {
            Format::Native => ciborium::from_reader(reader)?,
            Format::Json => serde_json::from_reader(reader)?,
        })
    }

    /// Write `value` to `path`, creating missing parent directories and
    /// replacing any previous file.
    pub fn write_file<T>(self, path: &Utf8Path, value: &T) -> Result<(), CodecError>
    where
        T: Serialize + ?Sized,
    {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        self.encode(value, &mut writer)?;
        writer.flush()?;

        Ok(())
    }

    pub fn read_file<T>(self, path: &Utf8Path) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        let reader = BufReader::new(File::open(path)?);
        self.decode(reader)
    }
}

impl FromStr for Format {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" | "cbor" => Ok(Format::Native),
            "json" => Ok(Format::Json),
            other => Err(WorkflowError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Native => write!(f, "native"),
            Format::Json => write!(f, "json"),
        }
    }
}
