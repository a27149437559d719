use anyhow::{Context, Error};
use log::{debug, info, warn};
use std::{
    io::Read,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryIter},
        Arc,
    },
    thread::{self, sleep, JoinHandle},
    time::{Duration, Instant},
};

use super::{Message, ACCEPT_SLEEP, ACCEPT_TIMEOUT, HOST, PORT};

/// The receiving end of a level source running on a background thread.
///
/// Dropping it stops the thread.
#[derive(Debug)]
pub struct LevelReceiver {
    receiver: Receiver<Message>,
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl LevelReceiver {
    /// Spawn `run` on a new thread. It gets a sender for messages and a flag that is
    /// cleared when the receiver wants it to stop.
    pub(crate) fn spawn<F>(local_addr: Option<SocketAddr>, run: F) -> Self
    where
        F: FnOnce(Sender<Message>, Arc<AtomicBool>) + Send + 'static,
    {
        let (sender, receiver) = channel();
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = active.clone();
        let handle = thread::spawn(move || {
            info!("Start thread");
            run(sender, thread_active);
            info!("Stopping thread");
        });
        Self {
            receiver,
            active,
            handle: Some(handle),
            local_addr,
        }
    }

    /// All messages received since the last call, without blocking
    pub fn try_iter(&self) -> TryIter<'_, Message> {
        self.receiver.try_iter()
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// The address the server listens on, if this receiver is backed by a server
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the background thread and wait for it to finish
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Level thread panicked");
            }
        }
    }
}

impl Drop for LevelReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A server receiving levels from the simulator.
#[derive(Debug, Clone)]
pub struct LevelServer {
    pub host: String,
    pub port: u16,
}

impl Default for LevelServer {
    fn default() -> Self {
        Self {
            host: HOST.to_string(),
            port: PORT,
        }
    }
}

impl LevelServer {
    pub fn new() -> Self {
        LevelServer::default()
    }

    pub fn with_host(&self, host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..self.to_owned()
        }
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.to_owned()
        }
    }

    /// Bind the server and receive levels on a background thread until the
    /// returned [LevelReceiver] is stopped or dropped.
    pub fn run_until_receiver_drops(&self) -> Result<LevelReceiver, Error> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .with_context(|| format!("Can't listen on {}:{}", self.host, self.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("Listening for levels on {}", local_addr);

        Ok(LevelReceiver::spawn(Some(local_addr), move |sender, active| {
            while active.load(Ordering::SeqCst) {
                let stream = match accept(&listener, &active) {
                    Some(s) => s,
                    None => continue,
                };
                debug!("Connection established");
                let data = match read_message(stream) {
                    Ok(d) => d,
                    Err(e) => {
                        debug!("Socket error, skipping message: {}", e);
                        continue;
                    }
                };
                match Message::parse(&data) {
                    Ok(Some(message)) => {
                        if sender.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => (),
                    Err(e) => warn!("Error with received message {:?}: {}", data, e),
                }
            }
        }))
    }
}

/// Wait up to [ACCEPT_TIMEOUT] for a connection
fn accept(listener: &TcpListener, active: &AtomicBool) -> Option<TcpStream> {
    let start = Instant::now();
    while active.load(Ordering::SeqCst) && start.elapsed() < ACCEPT_TIMEOUT {
        match listener.accept() {
            Ok((stream, _addr)) => return Some(stream),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => sleep(ACCEPT_SLEEP),
            Err(e) => {
                debug!("Accept failed: {}", e);
                sleep(ACCEPT_SLEEP);
            }
        }
    }
    None
}

fn read_message(mut stream: TcpStream) -> Result<String, Error> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut data = String::new();
    stream.read_to_string(&mut data)?;
    Ok(data)
}
