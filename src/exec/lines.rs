//! Line-oriented stream multiplexer
//!
//! Reads several non-blocking pipes from a single thread with `poll(2)`,
//! splits what arrives into lines, and hands each line to the callback
//! registered for its stream. Bytes are buffered per stream, so a line split
//! across reads (or across a multi-byte UTF-8 character) is delivered intact.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

const READ_CHUNK: usize = 4096;

struct Stream<'a> {
    file: File,
    buffer: Vec<u8>,
    eof: bool,
    on_line: Box<dyn FnMut(&str) + 'a>,
}

impl Stream<'_> {
    /// Read until the pipe would block or reports end of data.
    fn read_available(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.emit_lines();
        Ok(())
    }

    /// Deliver every complete line in the buffer, keeping the unterminated tail.
    fn emit_lines(&mut self) {
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            (self.on_line)(&String::from_utf8_lossy(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
    }

    fn flush_tail(&mut self) {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            (self.on_line)(&String::from_utf8_lossy(&tail));
        }
    }
}

/// Multiplexes line callbacks over a set of pipes.
///
/// Owns the registered descriptors; they are closed when the poller is
/// drained or dropped.
#[derive(Default)]
pub struct LinePoller<'a> {
    streams: Vec<Stream<'a>>,
}

impl<'a> LinePoller<'a> {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    /// Register a stream and the callback that receives its lines.
    ///
    /// The descriptor is switched to non-blocking mode.
    pub fn register<F>(&mut self, fd: impl Into<OwnedFd>, on_line: F) -> io::Result<()>
    where
        F: FnMut(&str) + 'a,
    {
        let fd: OwnedFd = fd.into();
        set_nonblocking(fd.as_raw_fd(), true)?;
        self.streams.push(Stream {
            file: File::from(fd),
            buffer: Vec::new(),
            eof: false,
            on_line: Box::new(on_line),
        });
        Ok(())
    }

    /// True while at least one stream has not reported end of data.
    pub fn is_open(&self) -> bool {
        self.streams.iter().any(|s| !s.eof)
    }

    /// Wait until a stream is readable (or `timeout` passes), then read and
    /// dispatch everything currently available.
    ///
    /// `None` waits indefinitely. Returns whether any stream is still open;
    /// with nothing left open this returns immediately.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let open: Vec<usize> = (0..self.streams.len())
            .filter(|&i| !self.streams[i].eof)
            .collect();
        if open.is_empty() {
            return Ok(false);
        }

        let mut fds: Vec<libc::pollfd> = open
            .iter()
            .map(|&i| libc::pollfd {
                fd: self.streams[i].file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        loop {
            // SAFETY: `fds` is a valid, initialized slice of pollfd structs
            // whose descriptors stay open for the duration of the call.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if rc >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        for (pfd, &i) in fds.iter().zip(&open) {
            if pfd.revents != 0 {
                self.streams[i].read_available()?;
            }
        }

        Ok(self.is_open())
    }

    /// Read every stream to end of data, dispatch the remaining lines, and
    /// deliver any unterminated trailing text as a final line.
    ///
    /// Meant to be called once the producer has exited.
    pub fn drain(mut self) -> io::Result<()> {
        for stream in &mut self.streams {
            if !stream.eof {
                stream.read_available()?;
            }
            if !stream.eof {
                set_nonblocking(stream.file.as_raw_fd(), false)?;
                stream.read_available()?;
            }
            stream.flush_tail();
        }
        Ok(())
    }
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: fcntl with F_GETFL/F_SETFL only touches the descriptor flags;
    // `fd` is owned by the caller and open.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(fd, libc::F_SETFL, flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
