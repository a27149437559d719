use anyhow::Error;
use log::{debug, info};
use rand::Rng;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread::sleep,
    time::{Duration, Instant},
};

use super::{
    buffer::{LevelBuffer, Transport},
    LevelReceiver, Message, ACCEPT_TIMEOUT, TEST_DT, TEST_LOCATIONS, TEST_SLEEP,
};

/// A random sound level between 40 and 70 dB
pub fn random_level() -> f64 {
    rand::thread_rng().gen_range(40.0..70.0)
}

fn random_levels(locations: &[String]) -> Vec<(String, f64)> {
    locations
        .iter()
        .map(|loc| (loc.clone(), random_level()))
        .collect()
}

/// Sleep for `duration`, waking up early when `active` is cleared
fn pause(duration: Duration, active: &AtomicBool) {
    let start = Instant::now();
    while active.load(Ordering::SeqCst) {
        let left = duration.saturating_sub(start.elapsed());
        if left.is_zero() {
            break;
        }
        sleep(left.min(ACCEPT_TIMEOUT));
    }
}

fn test_locations() -> Vec<String> {
    TEST_LOCATIONS.iter().map(|l| l.to_string()).collect()
}

/// A level source that makes up its own levels, for running the viewer without a simulation.
#[derive(Debug, Clone)]
pub struct DummySource {
    /// Simulation time step
    pub dt: f64,
    /// Wall time between updates
    pub sleep: Duration,
    pub locations: Vec<String>,
}

impl Default for DummySource {
    fn default() -> Self {
        Self {
            dt: TEST_DT,
            sleep: TEST_SLEEP,
            locations: test_locations(),
        }
    }
}

impl DummySource {
    pub fn new() -> Self {
        DummySource::default()
    }

    pub fn with_sleep(&self, sleep: Duration) -> Self {
        Self {
            sleep,
            ..self.to_owned()
        }
    }

    /// Generate levels on a background thread until the returned [LevelReceiver] is dropped
    pub fn run_until_receiver_drops(&self) -> LevelReceiver {
        let source = self.clone();
        LevelReceiver::spawn(None, move |sender, active| {
            let mut t = 0.0;
            while active.load(Ordering::SeqCst) {
                t += source.dt;
                let message = Message::Levels {
                    time: t,
                    levels: random_levels(&source.locations),
                };
                debug!("Generated {}", message);
                if sender.send(message).is_err() {
                    break;
                }
                pause(source.sleep, &active);
            }
        })
    }
}

/// A fake simulator client sending random levels to a viewer.
#[derive(Debug)]
pub struct DummyClient<T: Transport> {
    pub buffer: LevelBuffer<T>,
    pub dt: f64,
    pub locations: Vec<String>,
}

impl<T: Transport> DummyClient<T> {
    pub fn new(buffer: LevelBuffer<T>) -> Self {
        Self {
            buffer,
            dt: TEST_DT,
            locations: test_locations(),
        }
    }

    /// Send `clear`, then levels every `dt` of simulation time until `stop` is raised.
    /// Returns the simulation time reached.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<f64, Error> {
        info!("Running dummy client for {} location(s)", self.locations.len());
        self.buffer.send_clear();
        let mut t = 0.0;
        while !stop.load(Ordering::SeqCst) {
            t += self.dt;
            let levels = random_levels(&self.locations);
            self.buffer.send_levels(t, &levels)?;
        }
        info!("Dummy client stopped at {:.2}s, {} message(s) undelivered", t, self.buffer.pending());
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn levels_in_range() {
        for _ in 0..1000 {
            let level = random_level();
            assert!((40.0..70.0).contains(&level));
        }
    }

    #[test]
    fn stop_interrupts_pause() {
        let mut receiver = DummySource::new()
            .with_sleep(Duration::from_secs(3600))
            .run_until_receiver_drops();
        assert!(receiver.recv_timeout(Duration::from_secs(5)).is_ok());
        let start = Instant::now();
        receiver.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn source_advances_time() {
        let _ = env_logger::try_init();
        let receiver = DummySource::new()
            .with_sleep(Duration::from_millis(1))
            .run_until_receiver_drops();
        let timeout = Duration::from_secs(5);
        for step in 1..=3 {
            match receiver.recv_timeout(timeout).unwrap() {
                Message::Levels { time, levels } => {
                    assert!((time - step as f64 * TEST_DT).abs() < 1e-9);
                    let locs = levels.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>();
                    assert_eq!(locs, TEST_LOCATIONS);
                }
                Message::Clear => panic!("dummy source never clears"),
            }
        }
    }

    /// Stops the client after a fixed number of messages
    struct Counting {
        sent: Arc<Mutex<Vec<String>>>,
        stop: Arc<AtomicBool>,
        limit: usize,
    }

    impl Transport for Counting {
        fn send(&mut self, message: &str) -> Result<(), Error> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.to_string());
            if sent.len() >= self.limit {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn client_clears_then_sends() {
        let stop = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(vec![]));
        let transport = Counting {
            sent: sent.clone(),
            stop: stop.clone(),
            limit: 4,
        };
        let mut client = DummyClient::new(LevelBuffer::with_transport(transport));
        let t = client.run(&stop).unwrap();
        assert!((t - 3.0 * TEST_DT).abs() < 1e-9);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], "clear");
        assert!(sent[1].starts_with("0.50;(1.00,2.00,3.00):"));
        assert_eq!(sent.len(), 4);
    }
}
