//! Flat lists of density quartets.
//!
//! A quartet file is a sequence of fixed-size little-endian records, each made of four `u32`
//! absolute orbital indices $`i, j, k, l`$ followed by one `f64` value $`D_{ij,kl}`$.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::transform::{BacktransformError, SpinCase};

#[cfg(test)]
#[path = "quartet_tests.rs"]
mod quartet_tests;

/// Size in bytes of one quartet record.
pub const QUARTET_RECORD_SIZE: usize = 4 * 4 + 8;

/// Structure holding one element of a two-particle density with absolute orbital indices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TpdmElement {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub l: usize,
    pub value: f64,
}

impl TpdmElement {
    pub fn new(i: usize, j: usize, k: usize, l: usize, value: f64) -> Self {
        Self { i, j, k, l, value }
    }

    /// Returns the four orbital indices.
    pub fn indices(&self) -> [usize; 4] {
        [self.i, self.j, self.k, self.l]
    }
}

/// Type of the element streams produced by a [`TpdmSource`].
pub type TpdmElements<'a> = Box<dyn Iterator<Item = Result<TpdmElement, BacktransformError>> + 'a>;

/// Trait for providers of the source-basis density.
///
/// Every call to [`Self::elements`] must restart the stream from the beginning, since the
/// presort stage makes one pass over the source per row page.
pub trait TpdmSource {
    /// Streams the elements of one spin case of the density.
    fn elements(&self, spin: SpinCase) -> Result<TpdmElements<'_>, BacktransformError>;
}

// ============
// Quartet list
// ============

/// In-memory density source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuartetList {
    elements: IndexMap<SpinCase, Vec<TpdmElement>>,
}

impl QuartetList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the elements of one spin case, replacing any previously added for that spin case.
    pub fn with_spin(mut self, spin: SpinCase, elements: Vec<TpdmElement>) -> Self {
        self.elements.insert(spin, elements);
        self
    }

    /// Returns the elements of one spin case, if any have been added.
    pub fn spin(&self, spin: SpinCase) -> Option<&[TpdmElement]> {
        self.elements.get(&spin).map(|v| v.as_slice())
    }
}

impl From<Vec<TpdmElement>> for QuartetList {
    fn from(elements: Vec<TpdmElement>) -> Self {
        Self::new().with_spin(SpinCase::Total, elements)
    }
}

impl TpdmSource for QuartetList {
    fn elements(&self, spin: SpinCase) -> Result<TpdmElements<'_>, BacktransformError> {
        let elements = self.elements.get(&spin).ok_or_else(|| {
            BacktransformError::Configuration(format!(
                "No {spin} density elements have been supplied"
            ))
        })?;
        Ok(Box::new(elements.iter().copied().map(Ok)))
    }
}

// ============
// Quartet file
// ============

/// File-backed density source holding one quartet file per spin case.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuartetFile {
    paths: IndexMap<SpinCase, PathBuf>,
}

impl QuartetFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the quartet file of one spin case.
    pub fn with_spin<P: AsRef<Path>>(mut self, spin: SpinCase, path: P) -> Self {
        self.paths.insert(spin, path.as_ref().to_path_buf());
        self
    }

    pub fn path(&self, spin: SpinCase) -> Option<&Path> {
        self.paths.get(&spin).map(|p| p.as_path())
    }
}

impl TpdmSource for QuartetFile {
    fn elements(&self, spin: SpinCase) -> Result<TpdmElements<'_>, BacktransformError> {
        let path = self.paths.get(&spin).ok_or_else(|| {
            BacktransformError::Configuration(format!("No {spin} quartet file has been supplied"))
        })?;
        let file = File::open(path).map_err(|err| {
            BacktransformError::Io(format!(
                "Unable to open quartet file `{}`: {err}",
                path.display()
            ))
        })?;
        Ok(Box::new(QuartetRecords::new(BufReader::new(file))))
    }
}

/// Iterator over the records of a quartet stream.
pub struct QuartetRecords<R: Read> {
    reader: R,
    done: bool,
}

impl<R: Read> QuartetRecords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    fn read_record(&mut self) -> io::Result<Option<TpdmElement>> {
        // A clean end of stream can only occur before the first index of a record.
        let i = match self.reader.read_u32::<LittleEndian>() {
            Ok(i) => i,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err),
        };
        let j = self.reader.read_u32::<LittleEndian>()?;
        let k = self.reader.read_u32::<LittleEndian>()?;
        let l = self.reader.read_u32::<LittleEndian>()?;
        let value = self.reader.read_f64::<LittleEndian>()?;
        Ok(Some(TpdmElement::new(
            i as usize, j as usize, k as usize, l as usize, value,
        )))
    }
}

impl<R: Read> Iterator for QuartetRecords<R> {
    type Item = Result<TpdmElement, BacktransformError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(BacktransformError::Io(format!(
                    "Truncated or unreadable quartet record: {err}"
                ))))
            }
        }
    }
}

/// Writes one quartet record to a stream.
pub fn write_quartet<W: Write>(
    writer: &mut W,
    element: &TpdmElement,
) -> Result<(), BacktransformError> {
    for index in element.indices() {
        let index = u32::try_from(index).map_err(|_| {
            BacktransformError::DimensionMismatch(format!(
                "Orbital index {index} does not fit into a quartet record"
            ))
        })?;
        writer.write_u32::<LittleEndian>(index)?;
    }
    writer.write_f64::<LittleEndian>(element.value)?;
    Ok(())
}

/// Writes quartet records to a stream.
///
/// # Returns
///
/// The number of records written.
pub fn write_quartets<W: Write, I: IntoIterator<Item = TpdmElement>>(
    writer: &mut W,
    elements: I,
) -> Result<usize, BacktransformError> {
    let mut count = 0;
    for element in elements {
        write_quartet(writer, &element)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Writes quartet records to a file, replacing any existing content.
///
/// # Returns
///
/// The number of records written.
pub fn write_quartet_file<P: AsRef<Path>, I: IntoIterator<Item = TpdmElement>>(
    path: P,
    elements: I,
) -> Result<usize, BacktransformError> {
    let file = File::create(path.as_ref()).map_err(|err| {
        BacktransformError::Io(format!(
            "Unable to create quartet file `{}`: {err}",
            path.as_ref().display()
        ))
    })?;
    let mut writer = BufWriter::new(file);
    write_quartets(&mut writer, elements)
}
