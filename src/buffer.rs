use anyhow::{Context, Error};
use log::debug;
use std::{
    collections::VecDeque,
    io::Write,
    net::{Shutdown, TcpStream},
    thread::sleep,
    time::Duration,
};

use super::{Message, HOST, PORT};

/// Delivers a single encoded message to the viewer.
pub trait Transport {
    /// Send one message, returning an error if it did not reach the viewer.
    fn send(&mut self, message: &str) -> Result<(), Error>;
}

/// Sends every message over its own TCP connection, closing it afterwards.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    pub host: String,
    pub port: u16,
}

impl Transport for SocketTransport {
    fn send(&mut self, message: &str) -> Result<(), Error> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .with_context(|| format!("Can't connect to viewer at {}:{}", self.host, self.port))?;
        stream.write_all(message.as_bytes())?;
        stream.shutdown(Shutdown::Write)?;
        Ok(())
    }
}

/// Queue of messages on their way to the viewer.
///
/// Messages that can't be delivered stay queued in order and are retried
/// on the next send, so a viewer that is started late still gets everything.
#[derive(Debug)]
pub struct LevelBuffer<T: Transport = SocketTransport> {
    transport: T,
    queue: VecDeque<String>,
    /// If false, nothing is queued or sent
    pub active: bool,
    /// Pause after sending levels, to slow a simulation down
    pub sleep: Duration,
}

impl Default for LevelBuffer<SocketTransport> {
    fn default() -> Self {
        Self::new(HOST, PORT)
    }
}

impl LevelBuffer<SocketTransport> {
    /// A buffer sending to the viewer at `host:port`
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_transport(SocketTransport {
            host: host.to_string(),
            port,
        })
    }
}

impl<T: Transport> LevelBuffer<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            queue: VecDeque::new(),
            active: true,
            sleep: Duration::ZERO,
        }
    }

    pub fn with_sleep(self, sleep: Duration) -> Self {
        Self { sleep, ..self }
    }

    pub fn with_active(self, active: bool) -> Self {
        Self { active, ..self }
    }

    /// Number of messages waiting to be delivered
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send the levels at the receiver locations for simulation time `time`
    pub fn send_levels<S: AsRef<str>>(&mut self, time: f64, levels: &[(S, f64)]) -> Result<(), Error> {
        if !self.active {
            return Ok(());
        }
        let message = Message::levels(time, levels)?;
        self.queue.push_back(message.to_string());
        self.flush();
        if !self.sleep.is_zero() {
            sleep(self.sleep);
        }
        Ok(())
    }

    /// Tell the viewer to drop everything it received so far
    pub fn send_clear(&mut self) {
        if self.active {
            self.queue.push_back(Message::Clear.to_string());
            self.flush();
        }
    }

    /// Try to deliver the queued messages in order, stopping at the first failure.
    /// Returns the number of delivered messages.
    pub fn flush(&mut self) -> usize {
        let mut sent = 0;
        while self.active {
            let message = match self.queue.front() {
                Some(m) => m,
                None => break,
            };
            debug!("Trying to send message {:?}", message);
            match self.transport.send(message) {
                Ok(()) => {
                    self.queue.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    debug!("Sending failed ({}), {} message(s) queued", e, self.queue.len());
                    break;
                }
            }
        }
        sent
    }
}
