//! Readers of raw numeric values from binary files.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::marker::PhantomData;
use std::path::Path;

use anyhow::{self, Context};
use byteorder::{ByteOrder, ReadBytesExt};

#[cfg(test)]
#[path = "numeric_tests.rs"]
mod numeric_tests;

/// Trait for fixed-width numeric values that can be decoded from a byte stream.
pub(crate) trait BinaryValue: Sized {
    fn read_value<B: ByteOrder, R: Read>(reader: &mut R) -> io::Result<Self>;
}

macro_rules! impl_binary_value {
    ($($t:ty => $read:ident),+ $(,)?) => {$(
        impl BinaryValue for $t {
            fn read_value<B: ByteOrder, R: Read>(reader: &mut R) -> io::Result<Self> {
                reader.$read::<B>()
            }
        }
    )+}
}

impl_binary_value!(
    u32 => read_u32,
    u64 => read_u64,
    i32 => read_i32,
    i64 => read_i64,
    f64 => read_f64,
);

/// Iterator over the numeric values of a binary stream of a given byte order.
///
/// Iteration stops at the end of the stream or at the first value that cannot be read in full,
/// in which case [`Self::truncated`] reports it.
pub(crate) struct NumericReader<R: BufRead, B: ByteOrder, T: BinaryValue> {
    inner: R,
    truncated: bool,
    _byte_order: PhantomData<B>,
    _value: PhantomData<T>,
}

impl<R: BufRead, B: ByteOrder, T: BinaryValue> NumericReader<R, B, T> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            truncated: false,
            _byte_order: PhantomData,
            _value: PhantomData,
        }
    }

    /// Returns `true` if the stream ended part-way through a value or could not be read.
    pub(crate) fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<B: ByteOrder, T: BinaryValue> NumericReader<BufReader<File>, B, T> {
    /// Opens a binary file for reading.
    pub(crate) fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Unable to open `{}`", path.as_ref().display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead, B: ByteOrder, T: BinaryValue> Iterator for NumericReader<R, B, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.truncated {
            return None;
        }
        match self.inner.fill_buf() {
            Ok([]) => return None,
            Ok(_) => {}
            Err(_) => {
                self.truncated = true;
                return None;
            }
        }
        match T::read_value::<B, _>(&mut self.inner) {
            Ok(value) => Some(value),
            Err(_) => {
                self.truncated = true;
                None
            }
        }
    }
}
