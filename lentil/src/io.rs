//! Reading and writing delimited numeric tables, gzipped or not.

use crate::data::Table;
use crate::error::{Result, VariationalError};

use flate2::read::GzDecoder;
use ndarray::Array2;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Field separator: a string, or any one of several characters
pub enum Delimiter {
    Str(String),
    Chars(Vec<char>),
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter::Str(s.to_string())
    }
}

impl From<char> for Delimiter {
    fn from(c: char) -> Self {
        Delimiter::Chars(vec![c])
    }
}

impl<const N: usize> From<&[char; N]> for Delimiter {
    fn from(chars: &[char; N]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl Delimiter {
    fn split<'a>(&'a self, line: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Delimiter::Str(s) => Box::new(line.split(s.as_str())),
            Delimiter::Chars(chars) => Box::new(line.split(chars.as_slice())),
        }
    }

    fn first(&self) -> String {
        match self {
            Delimiter::Str(s) => s.clone(),
            Delimiter::Chars(chars) => chars.first().map(|c| c.to_string()).unwrap_or_default(),
        }
    }
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader(input_file: &str) -> Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not, or `stdout`
///
pub fn open_buf_writer(output_file: &str) -> Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

fn is_not_comment_line(line: &str) -> bool {
    !(line.starts_with('#') || line.starts_with('%') || line.trim().is_empty())
}

///
/// Read a numeric table whose first line holds the column names.
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - delimiter
///
pub fn read_table(input_file: &str, delim: impl Into<Delimiter>) -> Result<Table> {
    let delim = delim.into();
    let lines: Vec<String> = open_buf_reader(input_file)?
        .lines()
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .filter(|x| is_not_comment_line(x))
        .collect();

    let Some((header, body)) = lines.split_first() else {
        return Err(VariationalError::InvalidData(format!("{}: no header line", input_file)));
    };
    let columns: Vec<String> = delim.split(header).map(|s| s.trim().to_string()).collect();
    let ncols = columns.len();

    // Parsing takes more time, so split them into parallel jobs
    let rows = body
        .par_iter()
        .enumerate()
        .map(|(i, line)| {
            let row = delim
                .split(line)
                .map(|x| x.trim().parse::<f32>())
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| {
                    VariationalError::InvalidData(format!("{}: line {}: {}", input_file, i + 2, e))
                })?;
            if row.len() != ncols {
                return Err(VariationalError::InvalidData(format!(
                    "{}: line {} has {} fields, expected {}",
                    input_file,
                    i + 2,
                    row.len(),
                    ncols
                )));
            }
            Ok(row)
        })
        .collect::<Result<Vec<Vec<f32>>>>()?;

    let nrows = rows.len();
    let values = Array2::from_shape_vec((nrows, ncols), rows.into_iter().flatten().collect())?;
    Table::new(columns, values)
}

///
/// Write a table with a header line of column names.
///
/// * `output_file` - file name--either gzipped or not
/// * `delim` - delimiter
///
pub fn write_table(table: &Table, output_file: &str, delim: impl Into<Delimiter>) -> Result<()> {
    let sep = delim.into().first();
    let mut buf = open_buf_writer(output_file)?;
    writeln!(buf, "{}", table.columns().join(&sep))?;
    for row in table.values().rows() {
        let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        writeln!(buf, "{}", line.join(&sep))?;
    }
    buf.flush()?;
    Ok(())
}

/// Serialize `value` as pretty JSON.
pub fn write_json<T: serde::Serialize>(value: &T, output_file: &str) -> Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    serde_json::to_writer_pretty(&mut buf, value).map_err(std::io::Error::other)?;
    writeln!(buf)?;
    buf.flush()?;
    Ok(())
}
