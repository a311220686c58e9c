// SPDX-License-Identifier: GPL-3.0-or-later

//! `RemoteFs` over a plain FTP control connection

use super::remote::{RemoteError, RemoteFs, is_disconnect_kind, send_chunks};
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};

/// The MiniDexed FTP daemon answers BYE by closing the session
const QUIT_COMMAND: &str = "BYE";

fn classify(err: FtpError) -> RemoteError {
    match err {
        FtpError::ConnectionError(io) if is_disconnect_kind(io.kind()) => {
            RemoteError::Disconnected(io.to_string())
        }
        err @ (FtpError::ConnectionError(_)
        | FtpError::UnexpectedResponse(_)
        | FtpError::BadResponse
        | FtpError::InvalidAddress(_)) => RemoteError::Protocol(err.to_string()),
    }
}

pub struct FtpSession {
    stream: FtpStream,
    chunk_size: usize,
}

impl std::fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

fn socket_addr(address: &str, port: u16) -> Result<SocketAddr, RemoteError> {
    (address, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RemoteError::Protocol(format!("Could not resolve {address}")))
}

impl FtpSession {
    /// Open the control connection. Reads and writes share the connect timeout
    /// so a device that reboots mid-session cannot hang us.
    pub fn connect(
        address: &str,
        port: u16,
        timeout: Duration,
        chunk_size: usize,
    ) -> Result<Self, RemoteError> {
        let addr = socket_addr(address, port)?;
        let stream = FtpStream::connect_timeout(addr, timeout).map_err(classify)?;
        stream.get_ref().set_read_timeout(Some(timeout))?;
        stream.get_ref().set_write_timeout(Some(timeout))?;
        Ok(Self {
            stream,
            chunk_size: chunk_size.max(1),
        })
    }
}

impl RemoteFs for FtpSession {
    fn login(&mut self, user: &str, password: &str) -> Result<(), RemoteError> {
        self.stream.login(user, password).map_err(classify)?;
        self.stream.set_mode(Mode::Passive);
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(classify)
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, RemoteError> {
        self.stream.nlst(Some(path)).map_err(classify)
    }

    fn change_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.stream.cwd(path).map_err(classify)
    }

    fn list_working_dir(&mut self) -> Result<Vec<String>, RemoteError> {
        self.stream.nlst(None).map_err(classify)
    }

    fn delete_file(&mut self, path: &str) -> Result<(), RemoteError> {
        self.stream.rm(path).map_err(classify)
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.stream.rmdir(path).map_err(classify)
    }

    fn make_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.stream.mkdir(path).map_err(classify)
    }

    fn put(
        &mut self,
        path: &str,
        reader: &mut dyn Read,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, RemoteError> {
        let mut data = self.stream.put_with_stream(path).map_err(classify)?;
        let sent = send_chunks(reader, &mut data, self.chunk_size, on_chunk)?;
        self.stream.finalize_put_stream(data).map_err(classify)?;
        Ok(sent)
    }

    fn quit(&mut self) -> Result<(), RemoteError> {
        match self
            .stream
            .custom_command(QUIT_COMMAND, &[Status::Closing, Status::CommandOk])
        {
            Ok(_) => Ok(()),
            // A rebooting device closes the socket instead of replying
            Err(FtpError::BadResponse) => {
                Err(RemoteError::Disconnected("no reply to BYE".to_string()))
            }
            Err(e) => Err(classify(e)),
        }
    }
}
