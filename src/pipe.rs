//! A process-safe byte channel built on `pipe2`.
//!
//! Its main job is carrying the fork-child's pre-exec error message back to
//! the parent: the pipe is opened close-on-exec, so a successful `exec`
//! closes the write end and the parent's read returns empty. The tests also
//! use it to capture an inferior's stdout.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::errors::Result;

pub struct Pipe {
    read: Option<File>,
    write: Option<File>,
}

impl Pipe {
    pub fn new(close_on_exec: bool) -> Result<Self> {
        let flags = if close_on_exec {
            OFlag::O_CLOEXEC
        } else {
            OFlag::empty()
        };
        let (read, write) = pipe2(flags)?;
        Ok(Pipe {
            read: Some(File::from(read)),
            write: Some(File::from(write)),
        })
    }

    pub fn close_read(&mut self) {
        self.read = None;
    }

    pub fn close_write(&mut self) {
        self.write = None;
    }

    /// Hands the read end over to the caller.
    pub fn release_read(&mut self) -> Option<OwnedFd> {
        self.read.take().map(OwnedFd::from)
    }

    /// Hands the write end over to the caller (e.g. as a stdout
    /// replacement for a launched inferior).
    pub fn release_write(&mut self) -> Option<OwnedFd> {
        self.write.take().map(OwnedFd::from)
    }

    /// One blocking read of up to 1 KiB. An empty result means the write
    /// side has closed.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let Some(file) = self.read.as_mut() else {
            return Ok(Vec::new());
        };
        let mut buf = [0u8; 1024];
        let n = file.read(&mut buf)?;
        Ok(buf[..n].to_vec())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if let Some(file) = self.write.as_mut() {
            file.write_all(data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut pipe = Pipe::new(false).unwrap();
        pipe.write(b"hello").unwrap();
        pipe.close_write();
        assert_eq!(pipe.read().unwrap(), b"hello");
        assert_eq!(pipe.read().unwrap(), b"");
    }

    #[test]
    fn test_read_after_release_is_empty() {
        let mut pipe = Pipe::new(true).unwrap();
        let _fd = pipe.release_read().unwrap();
        assert_eq!(pipe.read().unwrap(), b"");
    }
}
