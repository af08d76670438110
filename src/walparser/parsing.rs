//! Little-endian field reading over `std::io::Read`, plus the two reader
//! adapters the decoders are built on: a length-bounded record reader and a
//! position-tracking reader that can skip to an alignment boundary.

use std::io::{self, Read};

use crate::{Error, Result};

/// A fixed-width little-endian integer as stored in WAL.
pub trait LeField: Sized + Copy {
    const SIZE: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! le_field {
    ($($ty:ty),*) => {
        $(
            impl LeField for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(buf)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

le_field!(u8, u16, u32, u64);

/// Field reads that name the field in the error they produce.
pub trait FieldReader: Read {
    fn read_field<T: LeField>(&mut self, field: &'static str) -> Result<T> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf[..T::SIZE])
            .map_err(|source| Error::FieldRead { field, source })?;
        Ok(T::from_le_slice(&buf))
    }

    fn read_bytes_field(&mut self, len: usize, field: &'static str) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)
            .map_err(|source| Error::FieldRead { field, source })?;
        Ok(buf)
    }
}

impl<R: Read + ?Sized> FieldReader for R {}

/// Reads until `buf` is full or the reader is exhausted, returning the count.
pub fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Reads whatever is left of `reader` and reports whether it was all zeros.
pub fn rest_is_zero<R: Read + ?Sized>(reader: &mut R) -> io::Result<bool> {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;
    Ok(is_zero(&rest))
}

pub fn is_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

/// Reader over the header section of a record. Every read, and every payload
/// announced through [`ShrinkableReader::shrink`], is charged against the
/// remaining record length; reads never go past it.
pub struct ShrinkableReader<'a, R: Read + ?Sized> {
    inner: &'a mut R,
    remaining: usize,
}

impl<'a, R: Read + ?Sized> ShrinkableReader<'a, R> {
    pub fn new(inner: &'a mut R, remaining: usize) -> Self {
        Self { inner, remaining }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn shrink(&mut self, len: usize) -> Result<()> {
        if len > self.remaining {
            return Err(Error::RecordLengthOverrun {
                requested: len,
                remaining: self.remaining,
            }
            .into());
        }
        self.remaining -= len;
        Ok(())
    }
}

impl<R: Read + ?Sized> Read for ShrinkableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(self.remaining);
        if limit == 0 {
            return Ok(0);
        }
        let n = self.inner.read(&mut buf[..limit])?;
        self.remaining -= n;
        Ok(n)
    }
}

/// Reader that counts consumed bytes so it can skip to the next multiple of
/// `alignment`.
pub struct AlignedReader<R> {
    inner: R,
    alignment: usize,
    position: usize,
}

impl<R: Read> AlignedReader<R> {
    pub fn new(inner: R, alignment: usize) -> Self {
        Self {
            inner,
            alignment,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Skips padding up to the next alignment boundary. Running out of input
    /// while skipping is not an error: the page simply ends there.
    pub fn read_to_alignment(&mut self) -> Result<()> {
        let misalignment = self.position % self.alignment;
        if misalignment == 0 {
            return Ok(());
        }
        let mut padding = vec![0u8; self.alignment - misalignment];
        read_up_to(self, &mut padding)?;
        Ok(())
    }
}

impl<R: Read> Read for AlignedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n;
        Ok(n)
    }
}
