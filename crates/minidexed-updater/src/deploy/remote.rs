// SPDX-License-Identifier: GPL-3.0-or-later

//! Remote filesystem operations the deployment needs from a device

use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The connection is gone (timeout, reset, closed by peer)
    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("{0}")]
    Protocol(String),

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// io errors that mean the peer went away rather than refused something
pub fn is_disconnect_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

pub fn classify_io(err: std::io::Error) -> RemoteError {
    if is_disconnect_kind(err.kind()) {
        RemoteError::Disconnected(err.to_string())
    } else {
        RemoteError::Io(err)
    }
}

/// Copy `reader` into `data` in `chunk_size` pieces and flush. Read errors are
/// local; write and flush errors belong to the remote side.
pub fn send_chunks(
    reader: &mut dyn Read,
    data: &mut dyn Write,
    chunk_size: usize,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64, RemoteError> {
    let mut buf = vec![0_u8; chunk_size.max(1)];
    let mut sent = 0_u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.write_all(&buf[..n]).map_err(classify_io)?;
        sent += n as u64;
        on_chunk(n as u64);
    }
    data.flush().map_err(classify_io)?;
    Ok(sent)
}

/// A logged-in session on a device's storage
pub trait RemoteFs {
    fn login(&mut self, user: &str, password: &str) -> Result<(), RemoteError>;

    /// Names under `path`; servers may return bare names or full paths
    fn list(&mut self, path: &str) -> Result<Vec<String>, RemoteError>;

    fn change_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Names in the working directory
    fn list_working_dir(&mut self) -> Result<Vec<String>, RemoteError>;

    fn delete_file(&mut self, path: &str) -> Result<(), RemoteError>;

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    fn make_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Store `reader` at `path`, overwriting in place. `on_chunk` is called
    /// with the size of every chunk sent.
    fn put(
        &mut self,
        path: &str,
        reader: &mut dyn Read,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, RemoteError>;

    /// Polite session end; the device may reboot and drop the link first
    fn quit(&mut self) -> Result<(), RemoteError>;
}
