//! Byte source abstraction for module loading
//!
//! Modules can be loaded from any seekable byte stream: a file on disk, an
//! in-memory slice, or an archive entry. The trait mirrors POSIX read/seek
//! semantics so implementations stay thin.

use crate::Result;
use std::io::{Read, Seek, SeekFrom};

/// A seekable stream of bytes that a [`Module`](crate::Module) can be parsed from.
///
/// Blanket-implemented for everything that is `Read + Seek`, which covers
/// `std::fs::File`, `std::io::Cursor<&[u8]>` and friends.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seek to a position in the stream, returning the new absolute offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current absolute offset in the stream.
    fn tell(&mut self) -> Result<u64>;
}

impl<T: Read + Seek> ByteSource for T {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(Read::read(self, buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(Seek::seek(self, pos)?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(Seek::stream_position(self)?)
    }
}

/// Little-endian scalar readers layered over any [`ByteSource`].
///
/// The XM wire format is strictly little-endian with fixed-size fields, so
/// the parser only ever needs these few primitives.
pub trait ReadLe: ByteSource {
    /// Read exactly `buf.len()` bytes or fail with a format error.
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(crate::XmError::Format(
                    "unexpected end of data".to_string(),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Read a single byte.
    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_bytes(&mut b)?;
        Ok(b[0])
    }

    /// Read a signed byte.
    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a little-endian u16.
    fn read_u16_le(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_bytes(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    /// Read a little-endian u32.
    fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_bytes(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Skip `count` bytes forward.
    fn skip(&mut self, count: i64) -> Result<()> {
        self.seek(SeekFrom::Current(count))?;
        Ok(())
    }
}

impl<T: ByteSource + ?Sized> ReadLe for T {}

/// Read a fixed-size, null-padded ASCII field into a `String`.
pub fn read_padded_string<S: ByteSource + ?Sized>(src: &mut S, len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    src.read_exact_bytes(&mut bytes)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&bytes[..end]).trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scalar_readers() {
        let data = [0x01u8, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF];
        let mut src = Cursor::new(&data[..]);

        assert_eq!(src.read_u8().unwrap(), 0x01);
        assert_eq!(src.read_u16_le().unwrap(), 0x1234);
        assert_eq!(src.read_u32_le().unwrap(), 0x12345678);
        assert_eq!(src.read_i8().unwrap(), -1);
    }

    #[test]
    fn test_read_past_end_is_format_error() {
        let mut src = Cursor::new(&[0u8; 2][..]);
        assert!(src.read_u32_le().is_err());
    }

    #[test]
    fn test_seek_and_tell() {
        let mut src = Cursor::new(&[0u8; 16][..]);
        src.skip(4).unwrap();
        assert_eq!(ByteSource::tell(&mut src).unwrap(), 4);
        ByteSource::seek(&mut src, SeekFrom::Start(10)).unwrap();
        assert_eq!(ByteSource::tell(&mut src).unwrap(), 10);
    }

    #[test]
    fn test_padded_string_stops_at_null() {
        let mut src = Cursor::new(&b"song\0\0\0\0"[..]);
        assert_eq!(read_padded_string(&mut src, 8).unwrap(), "song");
        assert_eq!(ByteSource::tell(&mut src).unwrap(), 8);
    }
}
