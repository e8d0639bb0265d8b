use std::io::{self, Read};

/// A reader over exactly `len` bytes of a parent stream.
///
/// Reads past the window return EOF. [`BoundedReader::finish`] (or drop)
/// consumes whatever the caller left unread, so the parent lands on the first
/// byte after the window. A parent that ends before the window does yields
/// `UnexpectedEof`.
pub struct BoundedReader<'a, R: Read + ?Sized> {
    inner: &'a mut R,
    remaining: u64,
}

impl<'a, R: Read + ?Sized> BoundedReader<'a, R> {
    pub fn new(inner: &'a mut R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Skips the unread rest of the window.
    pub fn finish(mut self) -> io::Result<()> {
        self.skip_rest()
    }

    fn skip_rest(&mut self) -> io::Result<()> {
        if self.remaining == 0 {
            return Ok(());
        }
        let want = self.remaining;
        let skipped = io::copy(&mut (&mut *self.inner).take(want), &mut io::sink())?;
        self.remaining -= skipped;
        if skipped < want {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes before end of chunk", want - skipped),
            ));
        }
        Ok(())
    }
}

impl<R: Read + ?Sized> Read for BoundedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes before end of chunk", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: Read + ?Sized> Drop for BoundedReader<'_, R> {
    fn drop(&mut self) {
        let _ = self.skip_rest();
    }
}

/// Counts bytes pulled through a reader so streaming parsers know their offset.
pub struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Discards bytes up to absolute offset `target`.
    pub fn skip_to(&mut self, target: u64) -> io::Result<()> {
        if target < self.position {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "cannot seek backwards from {} to {}",
                    self.position, target
                ),
            ));
        }
        let want = target - self.position;
        let skipped = io::copy(&mut self.by_ref().take(want), &mut io::sink())?;
        if skipped < want {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_window_is_exact() {
        let mut parent = Cursor::new(b"abcdefgh".to_vec());
        let mut sub = BoundedReader::new(&mut parent, 3);
        let mut out = Vec::new();
        sub.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        drop(sub);
        assert_eq!(parent.position(), 3);
    }

    #[test]
    fn test_finish_skips_unread_bytes() {
        let mut parent = Cursor::new(b"abcdefgh".to_vec());
        let mut sub = BoundedReader::new(&mut parent, 5);
        let mut first = [0u8; 2];
        sub.read_exact(&mut first).unwrap();
        assert_eq!(sub.remaining(), 3);
        sub.finish().unwrap();
        assert_eq!(parent.position(), 5);
    }

    #[test]
    fn test_truncated_parent() {
        let mut parent = Cursor::new(b"ab".to_vec());
        let sub = BoundedReader::new(&mut parent, 5);
        let err = sub.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_counting_skip() {
        let mut reader = CountingReader::new(Cursor::new(vec![0u8; 16]));
        reader.skip_to(10).unwrap();
        assert_eq!(reader.position(), 10);
        assert!(reader.skip_to(4).is_err());
        assert!(reader.skip_to(32).is_err());
    }
}
