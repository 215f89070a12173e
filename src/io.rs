//! File I/O utilities: XYZ geometry files and gzip helpers.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nalgebra::DVector;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Result, Write};
use std::path::Path;

/// Write a geometry to an XYZ file.
///
/// The XYZ format: atom count, a comment line, then one `Element X Y Z` line
/// per atom.
pub fn write_xyz(symbols: &[String], positions: &DVector<f64>, path: &Path) -> Result<()> {
    fs::write(path, xyz_block(symbols, positions, ""))
}

/// Append one frame to an XYZ trajectory file, flushing to disk immediately
/// so partial progress survives an external interruption.
pub fn append_xyz_frame(
    symbols: &[String],
    positions: &DVector<f64>,
    comment: &str,
    path: &Path,
) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(xyz_block(symbols, positions, comment).as_bytes())?;
    writer.flush()?;
    writer.into_inner()?.sync_all()
}

fn xyz_block(symbols: &[String], positions: &DVector<f64>, comment: &str) -> String {
    let mut content = format!("{}\n{}\n", symbols.len(), comment);
    for (i, symbol) in symbols.iter().enumerate() {
        content.push_str(&format!(
            "{}  {:.8}  {:.8}  {:.8}\n",
            symbol,
            positions[3 * i],
            positions[3 * i + 1],
            positions[3 * i + 2]
        ));
    }
    content
}

/// Read an XYZ file into symbols and flat coordinates.
pub fn read_xyz(path: &Path) -> Result<(Vec<String>, Vec<f64>)> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();
    let natoms: usize = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad XYZ header"))?;
    let _comment = lines.next();
    let mut symbols = Vec::with_capacity(natoms);
    let mut positions = Vec::with_capacity(3 * natoms);
    for line in lines.take(natoms) {
        let mut tokens = line.split_whitespace();
        let symbol = tokens
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "short XYZ line"))?;
        symbols.push(symbol.to_string());
        for _ in 0..3 {
            let value: f64 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "bad XYZ coordinate")
                })?;
            positions.push(value);
        }
    }
    if symbols.len() != natoms {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "XYZ atom count mismatch",
        ));
    }
    Ok((symbols, positions))
}

/// Gzip-compress `src` into `dest`.
pub fn gzip_file(src: &Path, dest: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dest)?), Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}

/// Decompress a gzipped `src` into `dest`.
pub fn gunzip_file(src: &Path, dest: &Path) -> Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(src)?));
    let mut writer = BufWriter::new(File::create(dest)?);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    writer.write_all(&buf)?;
    writer.flush()
}
