use std::io::{stdin, stdout, BufRead};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Error;
use crossterm::style::Print;
use crossterm::{
    cursor::{Hide, RestorePosition, SavePosition, Show},
    execute,
    terminal::{Clear, ClearType},
};
use log::{debug, info, warn};
use noysim::{self, acoustics::LevelStatistics, Applied, DummyClient, LevelBuffer, LevelServer, LevelStore};
use structopt::StructOpt;

/// Minimum time between two saves of a recorded session
const SAVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(StructOpt, Debug)]
#[structopt(name = "noysim-cli", about = "Receive or send road traffic noise levels")]
struct NoysimOptions {
    /// Host of the viewer
    #[structopt(long)]
    host: Option<String>,

    /// Port of the viewer
    #[structopt(short, long)]
    port: Option<u16>,

    #[structopt(subcommand)]
    mode: Mode,
}

#[derive(StructOpt, Debug)]
enum Mode {
    /// Receive levels and show them in the terminal
    Listen {
        /// Record the session to a file in the data directory
        #[structopt(short, long)]
        record: bool,
    },
    /// Send random levels to a running viewer
    Dummy {
        /// Pause after each time step, in milliseconds
        #[structopt(short, long)]
        sleep: Option<u64>,
    },
    /// List the recorded sessions with their level indicators
    Recordings,
}

/// Wait for a line on `input`. Returns false if the input is closed or can't be read.
fn wait_for_enter<R: BufRead>(mut input: R) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => {
            info!("Input closed, stop with Ctrl-C");
            false
        }
        Ok(_) => true,
        Err(e) => {
            warn!("Can't read input ({}), stop with Ctrl-C", e);
            false
        }
    }
}

/// Raise the returned flag when Enter is pressed
fn stop_on_enter() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    thread::spawn(move || {
        if wait_for_enter(stdin().lock()) {
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

/// A session recorded to a file, saved at most once per `interval`
struct Recording {
    path: PathBuf,
    interval: Duration,
    last_save: Option<Instant>,
    unsaved: bool,
}

impl Recording {
    fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            last_save: None,
            unsaved: false,
        }
    }

    fn changed(&mut self) {
        self.unsaved = true;
    }

    /// Save unsaved changes if the last save is old enough. Returns whether it saved.
    fn save_if_due(&mut self, store: &LevelStore) -> Result<bool, Error> {
        let due = self.last_save.map_or(true, |t| t.elapsed() >= self.interval);
        if !(self.unsaved && due) {
            return Ok(false);
        }
        self.save(store)?;
        Ok(true)
    }

    /// Save whatever is left
    fn finish(&mut self, store: &LevelStore) -> Result<(), Error> {
        if self.unsaved {
            self.save(store)?;
        }
        Ok(())
    }

    fn save(&mut self, store: &LevelStore) -> Result<(), Error> {
        debug!("Saving session to {}", self.path.display());
        store.save(&self.path)?;
        self.last_save = Some(Instant::now());
        self.unsaved = false;
        Ok(())
    }
}

/// Primitive function to draw the latest levels
fn draw_ui(store: &LevelStore) -> crossterm::Result<()> {
    execute!(stdout(), Clear(ClearType::FromCursorDown), SavePosition, Hide)?;

    if store.is_empty() {
        execute!(stdout(), Print("Waiting for levels..."))?;
    }

    for loc in store.locations() {
        if let Some(trace) = store.trace(&loc) {
            if let (Some(t), Some(level)) = (trace.times.last(), trace.levels.last()) {
                let leq = trace.levels.leq().unwrap_or(*level);
                execute!(
                    stdout(),
                    Print(format!("{}\t{:>8.2}s\t{:>6.2} dB\tLAeq {:>6.2} dB\n", loc, t, level, leq)),
                )?;
            }
        }
    }

    execute!(stdout(), RestorePosition)?;
    Ok(())
}

fn listen(server: LevelServer, record: bool) -> Result<(), Error> {
    let receiver = server.run_until_receiver_drops()?;
    let mut recording = if record {
        Some(Recording::new(LevelStore::session_file("json"), SAVE_INTERVAL))
    } else {
        None
    };

    println!("[[[ Noysim level viewer ]]]");
    if let Some(rec) = &recording {
        println!("=> This session is recorded to {}", rec.path.to_string_lossy());
    }
    println!("Running in command line mode - press Enter to stop...");

    let stop = stop_on_enter();
    let mut store = LevelStore::new();
    draw_ui(&store)?;
    while !stop.load(Ordering::SeqCst) {
        if let Ok(message) = receiver.recv_timeout(Duration::from_millis(100)) {
            let changed = match store.apply(message) {
                Applied::Cleared => {
                    info!("Levels cleared");
                    true
                }
                Applied::Discarded => {
                    info!("Discarded non-chronological levels");
                    false
                }
                Applied::Appended(_) => true,
            };
            if let Some(rec) = recording.as_mut().filter(|_| changed) {
                rec.changed();
            }
            draw_ui(&store)?;
        }
        if let Some(rec) = recording.as_mut() {
            rec.save_if_due(&store)?;
        }
    }
    if let Some(rec) = recording.as_mut() {
        rec.finish(&store)?;
    }
    execute!(stdout(), Show)?;
    Ok(())
}

fn dummy(host: &str, port: u16, sleep: Duration) -> Result<(), Error> {
    println!("Running dummy simulator client - press Enter to stop...");
    let stop = stop_on_enter();
    let mut client = DummyClient::new(LevelBuffer::new(host, port).with_sleep(sleep));
    let t = client.run(&stop)?;
    println!("Stopped after {:.2}s of simulation time", t);
    Ok(())
}

fn recordings() -> Result<(), Error> {
    let files = LevelStore::recordings().unwrap_or_default();
    if files.is_empty() {
        println!("No recordings in {}", LevelStore::data_dir().to_string_lossy());
    }
    for file in files {
        let mut store = LevelStore::new();
        if let Err(e) = store.load(&file) {
            warn!("Skipping {}: {}", file.to_string_lossy(), e);
            continue;
        }
        println!("{}", file.to_string_lossy());
        for loc in store.locations() {
            let trace = match store.trace(&loc) {
                Some(t) => t,
                None => continue,
            };
            // a single sample counts as one second
            let dt = trace.dt().unwrap_or(1.0);
            if let Some(ind) = trace.levels.indicators(dt) {
                println!("  {}\t{}", loc, ind);
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    let opts = NoysimOptions::from_args();

    let mut server = LevelServer::default();
    if let Some(host) = opts.host {
        server.host = host;
    }
    if let Some(port) = opts.port {
        server.port = port;
    }

    match opts.mode {
        Mode::Listen { record } => listen(server, record),
        Mode::Dummy { sleep } => {
            let sleep = sleep
                .map(Duration::from_millis)
                .unwrap_or(noysim::TEST_SLEEP);
            dummy(&server.host, server.port, sleep)
        }
        Mode::Recordings => recordings(),
    }
}
