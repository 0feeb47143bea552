/// Debug wire connection: handshake, request/reply correlation
use crate::config::types::{Result, SandboxError};
use crate::interrupt::jdwp::packet::{
    commands, Command, IdSizes, Packet, PacketReader, ERROR_VM_DEAD, HANDSHAKE, HEADER_LEN,
};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

pub struct JdwpConnection {
    stream: TcpStream,
    next_id: u32,
    sizes: IdSizes,
}

impl JdwpConnection {
    /// Handshake on an accepted connection and query identifier sizes.
    /// `timeout` bounds every later read as well, so a wedged runtime cannot
    /// hang an interrupt.
    pub fn establish(mut stream: TcpStream, timeout: Duration) -> Result<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        stream.write_all(HANDSHAKE)?;
        let mut reply = [0u8; HANDSHAKE.len()];
        stream.read_exact(&mut reply)?;
        if &reply != HANDSHAKE {
            return Err(SandboxError::Protocol(format!(
                "unexpected handshake reply {:?}",
                String::from_utf8_lossy(&reply)
            )));
        }

        let mut connection = Self {
            stream,
            next_id: 1,
            sizes: IdSizes::default(),
        };
        let data = connection.request(commands::VM_ID_SIZES, &[])?;
        let mut reader = PacketReader::new(connection.sizes, &data);
        connection.sizes = IdSizes {
            field_id: reader.count()?,
            method_id: reader.count()?,
            object_id: reader.count()?,
            reference_type_id: reader.count()?,
            frame_id: reader.count()?,
        };
        log::debug!("Debug connection established, id sizes {:?}", connection.sizes);
        Ok(connection)
    }

    pub fn sizes(&self) -> IdSizes {
        self.sizes
    }

    /// Send a command and wait for its reply payload. Event packets the
    /// runtime sends in between are skipped.
    pub fn request(&mut self, command: Command, data: &[u8]) -> Result<Vec<u8>> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.stream
            .write_all(&Packet::encode_command(id, command, data))
            .map_err(disconnect_or_io)?;

        loop {
            match self.read_packet()? {
                Packet::Reply {
                    id: reply_id,
                    error_code,
                    data,
                } if reply_id == id => {
                    return match error_code {
                        0 => Ok(data),
                        ERROR_VM_DEAD => Err(SandboxError::Disconnected),
                        code => Err(SandboxError::Protocol(format!(
                            "command {}.{} failed with error {}",
                            command.set, command.code, code
                        ))),
                    };
                }
                Packet::Reply { id: other, .. } => {
                    log::debug!("Dropping stale reply {} while waiting for {}", other, id);
                }
                Packet::Command { command, .. } => {
                    log::trace!("Skipping event packet {}.{}", command.set, command.code);
                }
            }
        }
    }

    fn read_packet(&mut self) -> Result<Packet> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).map_err(disconnect_or_io)?;
        let mut data = vec![0u8; Packet::payload_len(&header)?];
        self.stream.read_exact(&mut data).map_err(disconnect_or_io)?;
        Ok(Packet::decode(&header, data))
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn disconnect_or_io(err: std::io::Error) -> SandboxError {
    let err = SandboxError::Io(err);
    if err.is_disconnect() {
        SandboxError::Disconnected
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::jdwp::packet::REPLY_FLAG;
    use std::net::TcpListener;

    fn reply(id: u32, error_code: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = ((HEADER_LEN + data.len()) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.push(REPLY_FLAG);
        buf.extend_from_slice(&error_code.to_be_bytes());
        buf.extend_from_slice(data);
        buf
    }

    fn read_command(stream: &mut TcpStream) -> (u32, u8, u8) {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).unwrap();
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut data = vec![0u8; len - HEADER_LEN];
        stream.read_exact(&mut data).unwrap();
        (
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            header[9],
            header[10],
        )
    }

    #[test]
    fn test_handshake_events_and_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            let mut handshake = [0u8; 14];
            stream.read_exact(&mut handshake).unwrap();
            stream.write_all(&handshake).unwrap();

            let (id, set, code) = read_command(&mut stream);
            assert_eq!((set, code), (1, 7));
            let mut sizes = Vec::new();
            for size in [8i32, 8, 8, 8, 8] {
                sizes.extend_from_slice(&size.to_be_bytes());
            }
            stream.write_all(&reply(id, 0, &sizes)).unwrap();

            // an event (composite, VM_START) arrives before the reply
            let (id, set, code) = read_command(&mut stream);
            assert_eq!((set, code), (1, 8));
            let mut event = 11u32.to_be_bytes().to_vec();
            event.extend_from_slice(&[0, 0, 0, 1, 0, 64, 100]);
            stream.write_all(&event).unwrap();
            stream.write_all(&reply(id, 0, &[])).unwrap();

            let (id, _, _) = read_command(&mut stream);
            stream.write_all(&reply(id, 13, &[])).unwrap();

            let (id, _, _) = read_command(&mut stream);
            stream.write_all(&reply(id, ERROR_VM_DEAD, &[])).unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        let mut connection = JdwpConnection::establish(stream, Duration::from_secs(5)).unwrap();
        assert_eq!(connection.sizes(), IdSizes::default());
        assert!(connection.request(commands::VM_SUSPEND, &[]).unwrap().is_empty());
        assert!(matches!(
            connection.request(commands::VM_RESUME, &[]),
            Err(SandboxError::Protocol(_))
        ));
        assert!(matches!(
            connection.request(commands::VM_ALL_THREADS, &[]),
            Err(SandboxError::Disconnected)
        ));
        target.join().unwrap();
        assert!(matches!(
            connection.request(commands::VM_RESUME, &[]),
            Err(SandboxError::Disconnected)
        ));
    }
}
