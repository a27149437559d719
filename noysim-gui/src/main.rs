mod app;

use anyhow::{anyhow, Error};
use eframe::egui;
use noysim::{DummySource, LevelServer};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "noysim-gui", about = "Real-time viewer of road traffic noise levels")]
struct ViewerOptions {
    /// Generate random levels instead of listening for a simulation
    #[structopt(long)]
    test: bool,

    /// Host to listen on
    #[structopt(long)]
    host: Option<String>,

    /// Port to listen on
    #[structopt(short, long)]
    port: Option<u16>,
}

fn main() -> Result<(), Error> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();

    let opts = ViewerOptions::from_args();

    let receiver = if opts.test {
        DummySource::default().run_until_receiver_drops()
    } else {
        let mut server = LevelServer::default();
        if let Some(host) = opts.host {
            server.host = host;
        }
        if let Some(port) = opts.port {
            server.port = port;
        }
        server.run_until_receiver_drops()?
    };

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(app::NAME)
            .with_inner_size([520.0, 560.0])
            .with_window_level(egui::WindowLevel::AlwaysOnTop),
        ..Default::default()
    };
    eframe::run_native(
        app::NAME,
        native_options,
        Box::new(move |cc| Ok(Box::new(app::ViewerApp::new(cc, receiver)))),
    )
    .map_err(|e| anyhow!("Viewer failed: {}", e))
}
