/// Control channel framing
///
/// Each frame is a 4-byte big-endian payload length followed by one JSON
/// document.
use crate::config::types::{Result, SandboxError};
use crate::core::types::{ControlRequest, ControlResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| SandboxError::Channel(format!("failed to encode frame: {e}")))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(SandboxError::Channel(format!(
            "frame of {} bytes exceeds limit of {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SandboxError::Channel(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    serde_json::from_slice(&payload)
        .map_err(|e| SandboxError::Channel(format!("failed to decode frame: {e}")))
}

/// Host side of the control connection
pub struct ControlChannel {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }

    /// Independent handle to the socket, used to shut it down while another
    /// thread is blocked reading.
    pub fn shutdown_handle(&self) -> Result<TcpStream> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    pub fn send(&mut self, request: &ControlRequest) -> Result<()> {
        log::debug!("-> {}", request.name());
        write_frame(&mut self.writer, request)
    }

    pub fn receive(&mut self) -> Result<ControlResponse> {
        let response: ControlResponse = read_frame(&mut self.reader)?;
        log::trace!("<- {:?}", response);
        Ok(response)
    }

    pub fn shutdown(&self) {
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}
