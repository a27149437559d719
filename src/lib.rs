//! Real-time noise level viewer for road traffic simulations.
//!
//! A traffic simulation plugin computes sound levels at receiver locations and pushes
//! them to the viewer with a [LevelBuffer]. The viewer receives them with a [LevelServer]
//! (or makes them up with a [DummySource]) and collects them in a [LevelStore].

use std::time::Duration;

/// Wire format of the messages between plugin and viewer
mod protocol;
pub use protocol::Message;

/// Sending side: message queue and transport
mod buffer;
pub use buffer::{LevelBuffer, SocketTransport, Transport};

/// Receiving side: TCP server on a background thread
mod server;
pub use server::{LevelReceiver, LevelServer};

/// Level sources for testing without a simulation
mod dummy;
pub use dummy::{random_level, DummyClient, DummySource};

/// Storage of received levels per receiver location
mod store;
pub use store::{Applied, LevelStore, LevelTrace};

/// Axis range modes of the level plot
pub mod axes;

/// Decibel calculus and level indicators
pub mod acoustics;

/// Default host of the viewer
pub const HOST: &str = "localhost";
/// Default port of the viewer
pub const PORT: u16 = 50007;

/// How long the server waits for a connection before checking whether it should stop
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(10);
/// Pause between two attempts to accept a connection
pub const ACCEPT_SLEEP: Duration = Duration::from_millis(1);

/// Period between redraws of the viewer
pub const REDRAW_TIME: Duration = Duration::from_millis(100);
/// How long a message stays on the status bar
pub const FLASH_TIME: Duration = Duration::from_millis(1500);

/// Increment of the axis range controls
pub const SPIN_INCREMENT: f64 = 5.0;
/// Minimal width of the time axis (s)
pub const X_MIN_WIDTH: f64 = 10.0;
/// Initial width of the sliding time window (s)
pub const X_WIDTH: f64 = 30.0;
/// Minimal low value and height of the manual level range (dB)
pub const Y_MIN: (f64, f64) = (0.0, 10.0);
/// Initial low value and height of the manual level range (dB)
pub const Y_RANGE: (f64, f64) = (30.0, 60.0);
/// Margin around the automatic level range (dB)
pub const MARGIN: f64 = 1.0;

/// Simulation time step of the dummy sources (s)
pub const TEST_DT: f64 = 0.5;
/// Wall time between two updates of the dummy sources
pub const TEST_SLEEP: Duration = Duration::from_millis(200);
/// Receiver locations of the dummy sources
pub const TEST_LOCATIONS: [&str; 2] = ["(1.00,2.00,3.00)", "(4.00,5.00,6.00)"];
