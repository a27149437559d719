use anyhow::Error;
use eframe::egui::{self, Color32, ColorImage, Key, Modifiers, ViewportCommand, WindowLevel};
use egui_plot::{Line, Plot, PlotBounds, PlotPoints};
use log::{info, warn};
use noysim::{
    acoustics::{BasicIndicators, LevelStatistics},
    axes::{XRange, YRange},
    Applied, LevelReceiver, LevelStore, FLASH_TIME, REDRAW_TIME, SPIN_INCREMENT, X_MIN_WIDTH,
    X_WIDTH, Y_MIN, Y_RANGE,
};
use std::{fs::create_dir_all, path::Path, sync::Arc, time::Instant};

pub const NAME: &str = concat!("Noysim ", env!("CARGO_PKG_VERSION"), " Viewer");
const ABOUT: &str = "Real-time viewer of road traffic noise levels\ncomputed by the Noysim simulation plugin.";

const LINE_COLOR: Color32 = Color32::YELLOW;
const BACKGROUND_COLOR: Color32 = Color32::BLACK;
const LINE_WIDTH: f32 = 1.0;

/// Viewer options the user can change. We derive Deserialize/Serialize so they
/// can be persisted on shutdown.
#[cfg_attr(feature = "persistence", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "persistence", serde(default))] // if we add new fields, give them default values when deserializing old state
#[derive(Debug, Clone)]
pub struct ViewerSettings {
    pub show_grid: bool,
    pub x_labels: bool,
    pub stay_on_top: bool,
    pub x_full: bool,
    pub x_width: f64,
    pub y_auto: bool,
    pub y_low: f64,
    pub y_height: f64,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            show_grid: true,
            x_labels: true,
            stay_on_top: true,
            x_full: true,
            x_width: X_WIDTH,
            y_auto: true,
            y_low: Y_RANGE.0,
            y_height: Y_RANGE.1,
        }
    }
}

impl ViewerSettings {
    pub fn x_range(&self) -> XRange {
        if self.x_full {
            XRange::Full
        } else {
            XRange::sliding(self.x_width)
        }
    }

    pub fn y_range(&self) -> YRange {
        if self.y_auto {
            YRange::Auto
        } else {
            YRange::manual(self.y_low, self.y_height)
        }
    }
}

/// What the plot shows. Kept while the viewer is paused.
#[derive(Debug, Clone)]
struct Snapshot {
    location: String,
    points: Vec<[f64; 2]>,
    bounds: Option<PlotBounds>,
    indicators: Option<BasicIndicators>,
}

pub struct ViewerApp {
    receiver: LevelReceiver,
    store: LevelStore,
    /// Locations in the choice box
    locations: Vec<String>,
    selected: usize,
    paused: bool,
    snapshot: Option<Snapshot>,
    settings: ViewerSettings,
    window_level: Option<bool>,
    status: Option<(String, Instant)>,
    show_about: bool,
}

impl ViewerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, receiver: LevelReceiver) -> Self {
        #[cfg(feature = "persistence")]
        let settings = cc
            .storage
            .and_then(|s| eframe::get_value(s, eframe::APP_KEY))
            .unwrap_or_default();
        #[cfg(not(feature = "persistence"))]
        let settings = {
            let _ = cc;
            ViewerSettings::default()
        };
        Self::with_settings(receiver, settings)
    }

    pub fn with_settings(receiver: LevelReceiver, settings: ViewerSettings) -> Self {
        Self {
            receiver,
            store: LevelStore::new(),
            locations: vec![],
            selected: 0,
            paused: false,
            snapshot: None,
            settings,
            window_level: None,
            status: None,
            show_about: false,
        }
    }

    /// Show a message on the status bar for a little while
    fn flash_status_message(&mut self, message: impl Into<String>) {
        self.status = Some((message.into(), Instant::now()));
    }

    /// Move received levels into the store
    fn receive(&mut self) {
        let messages = self.receiver.try_iter().collect::<Vec<_>>();
        for message in messages {
            if self.store.apply(message) == Applied::Cleared {
                self.clear_view();
            }
        }
    }

    /// Receive new levels and, unless paused, update what is shown
    fn refresh(&mut self) {
        self.receive();
        if !self.paused {
            self.update_locations();
            self.snapshot = self.take_snapshot();
        }
    }

    fn clear(&mut self) {
        self.store.clear();
        self.clear_view();
    }

    fn clear_view(&mut self) {
        self.locations.clear();
        self.selected = 0;
        self.snapshot = None;
        self.flash_status_message("Cleared");
    }

    /// Sync the choice box with the store, keeping the selected location
    fn update_locations(&mut self) {
        let locations = self.store.locations();
        if locations == self.locations {
            return;
        }
        let first_data = self.locations.is_empty();
        let selected = self.locations.get(self.selected).cloned();
        self.selected = selected
            .and_then(|s| locations.iter().position(|l| *l == s))
            .unwrap_or(0);
        self.locations = locations;
        if first_data && !self.locations.is_empty() {
            self.flash_status_message("Connection established");
        }
    }

    fn take_snapshot(&self) -> Option<Snapshot> {
        let location = self.locations.get(self.selected)?;
        let trace = self.store.trace(location)?;
        let bounds = match (
            self.settings.x_range().bounds(&trace.times),
            self.settings.y_range().bounds(&trace.levels),
        ) {
            (Some((xmin, xmax)), Some((ymin, ymax))) => {
                Some(PlotBounds::from_min_max([xmin, ymin], [xmax, ymax]))
            }
            _ => None,
        };
        Some(Snapshot {
            location: location.clone(),
            points: trace.points(),
            bounds,
            indicators: trace.levels.basic_indicators(),
        })
    }

    fn update_window_level(&mut self, ctx: &egui::Context) {
        if self.window_level == Some(self.settings.stay_on_top) {
            return;
        }
        let level = if self.settings.stay_on_top {
            WindowLevel::AlwaysOnTop
        } else {
            WindowLevel::Normal
        };
        ctx.send_viewport_cmd(ViewportCommand::WindowLevel(level));
        self.window_level = Some(self.settings.stay_on_top);
    }

    fn save_levels(&mut self) {
        let path = LevelStore::session_file("json");
        match self.store.save(&path) {
            Ok(()) => self.flash_status_message(format!("Saved to {}", path.display())),
            Err(e) => {
                warn!("Can't save levels: {}", e);
                self.flash_status_message(format!("Error: {}", e));
            }
        }
    }

    fn handle_screenshots(&mut self, ctx: &egui::Context) {
        let screenshot = ctx.input(|i| {
            i.raw
                .events
                .iter()
                .filter_map(|e| match e {
                    egui::Event::Screenshot { image, .. } => Some(image.clone()),
                    _ => None,
                })
                .last()
        });
        if let Some(image) = screenshot {
            let path = LevelStore::session_file("png");
            match save_png(&image, &path) {
                Ok(()) => {
                    info!("Plot saved to {}", path.display());
                    self.flash_status_message(format!("Saved to {}", path.display()));
                }
                Err(e) => {
                    warn!("Can't save plot: {}", e);
                    self.flash_status_message(format!("Error: {}", e));
                }
            }
        }
    }

    fn menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Save plot\tCtrl-S").clicked() {
                        ctx.send_viewport_cmd(ViewportCommand::Screenshot(Default::default()));
                        ui.close();
                    }
                    if ui.button("Save levels").clicked() {
                        self.save_levels();
                        ui.close();
                    }
                    ui.separator();
                    if ui.button("Exit\tCtrl-X").clicked() {
                        ctx.send_viewport_cmd(ViewportCommand::Close);
                    }
                });
                ui.menu_button("View", |ui| {
                    ui.checkbox(&mut self.settings.stay_on_top, "Stay on top");
                });
                ui.menu_button("Help", |ui| {
                    if ui.button("About...").clicked() {
                        self.show_about = true;
                        ui.close();
                    }
                });
            });
        });
    }

    fn status_bar(&mut self, ctx: &egui::Context) {
        if let Some((_, since)) = &self.status {
            if since.elapsed() > FLASH_TIME {
                self.status = None;
            }
        }
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.add_sized([50.0, 16.0], egui::Label::new(if self.paused { "Paused" } else { "" }));
                ui.separator();
                if let Some((message, _)) = &self.status {
                    ui.label(message.as_str());
                }
            });
        });
    }

    fn controls(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Select location:");
                let locations = &self.locations;
                let selected = &mut self.selected;
                ui.add_enabled_ui(!locations.is_empty(), |ui| {
                    egui::ComboBox::from_id_salt("location")
                        .width(150.0)
                        .show_index(ui, selected, locations.len(), |i| {
                            locations.get(i).cloned().unwrap_or_default()
                        });
                });
            });

            ui.horizontal(|ui| {
                let label = if self.paused { "Resume" } else { "Pause" };
                if ui.button(label).clicked() {
                    self.paused = !self.paused;
                }
                if ui.button("Clear").clicked() {
                    self.clear();
                }
                ui.checkbox(&mut self.settings.show_grid, "Show grid");
                ui.checkbox(&mut self.settings.x_labels, "X-labels");
            });

            ui.horizontal(|ui| {
                let settings = &mut self.settings;
                ui.group(|ui| {
                    ui.vertical(|ui| {
                        ui.label("X-axis");
                        ui.radio_value(&mut settings.x_full, true, "Full range");
                        ui.horizontal(|ui| {
                            ui.radio_value(&mut settings.x_full, false, "Sliding");
                            ui.add_enabled_ui(!settings.x_full, |ui| {
                                spin(ui, &mut settings.x_width, X_MIN_WIDTH);
                            });
                        });
                    });
                });
                ui.group(|ui| {
                    ui.vertical(|ui| {
                        ui.label("Y-axis");
                        ui.radio_value(&mut settings.y_auto, true, "Auto");
                        ui.horizontal(|ui| {
                            ui.radio_value(&mut settings.y_auto, false, "Manual");
                            ui.add_enabled_ui(!settings.y_auto, |ui| {
                                spin(ui, &mut settings.y_low, Y_MIN.0);
                                spin(ui, &mut settings.y_height, Y_MIN.1);
                            });
                        });
                    });
                });
                if let Some(ind) = self.snapshot.as_ref().and_then(|s| s.indicators) {
                    ui.group(|ui| {
                        egui::Grid::new("indicators").show(ui, |ui| {
                            for (name, value) in [
                                ("LAeq", ind.laeq),
                                ("LAmin", ind.lamin),
                                ("LAmax", ind.lamax),
                                ("LA10", ind.la10),
                                ("LA50", ind.la50),
                                ("LA90", ind.la90),
                                ("sigma", ind.sigma),
                            ] {
                                ui.label(name);
                                ui.label(format!("{:.1} dB", value));
                                ui.end_row();
                            }
                        });
                    });
                }
            });
        });
    }

    fn plot(&self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.visuals_mut().extreme_bg_color = BACKGROUND_COLOR;
            let mut plot = Plot::new("levels")
                .allow_drag(false)
                .allow_zoom(false)
                .allow_scroll(false)
                .allow_boxed_zoom(false)
                .show_grid(self.settings.show_grid)
                .y_axis_label("dB(A)");
            if !self.settings.x_labels {
                plot = plot.x_axis_formatter(|_, _| String::new());
            }
            plot.show(ui, |plot_ui| {
                if let Some(snapshot) = &self.snapshot {
                    if let Some(bounds) = snapshot.bounds {
                        plot_ui.set_plot_bounds(bounds);
                    }
                    plot_ui.line(
                        Line::new(snapshot.location.clone(), PlotPoints::from(snapshot.points.clone()))
                            .color(LINE_COLOR)
                            .width(LINE_WIDTH),
                    );
                }
            });
        });
    }
}

/// A non-editable number with buttons stepping by [SPIN_INCREMENT]
fn spin(ui: &mut egui::Ui, value: &mut f64, min: f64) {
    if ui.small_button("-").clicked() {
        *value = (*value - SPIN_INCREMENT).max(min);
    }
    ui.label(format!("{:.0}", value));
    if ui.small_button("+").clicked() {
        *value += SPIN_INCREMENT;
    }
}

fn save_png(image: &Arc<ColorImage>, path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    image::save_buffer(
        path,
        image.as_raw(),
        image.width() as u32,
        image.height() as u32,
        image::ColorType::Rgba8,
    )?;
    Ok(())
}

impl eframe::App for ViewerApp {
    /// Called by the framework to save the viewer settings before shutdown.
    #[cfg(feature = "persistence")]
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        eframe::set_value(storage, eframe::APP_KEY, &self.settings);
    }

    /// Called each time the UI needs repainting, at least every [REDRAW_TIME].
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(REDRAW_TIME);

        if ctx.input_mut(|i| i.consume_key(Modifiers::CTRL, Key::S)) {
            ctx.send_viewport_cmd(ViewportCommand::Screenshot(Default::default()));
        }
        if ctx.input_mut(|i| i.consume_key(Modifiers::CTRL, Key::X)) {
            ctx.send_viewport_cmd(ViewportCommand::Close);
        }

        self.refresh();
        self.update_window_level(ctx);
        self.handle_screenshots(ctx);

        self.menu_bar(ctx);
        self.status_bar(ctx);
        self.controls(ctx);
        self.plot(ctx);

        egui::Window::new(format!("About {}", NAME))
            .open(&mut self.show_about)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(ABOUT);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noysim::{LevelBuffer, LevelServer, Message};
    use std::time::Duration;

    /// A viewer listening on a free local port, with nobody sending
    fn idle_viewer() -> ViewerApp {
        let receiver = LevelServer::new()
            .with_host("127.0.0.1")
            .with_port(0)
            .run_until_receiver_drops()
            .unwrap();
        ViewerApp::with_settings(receiver, ViewerSettings::default())
    }

    fn sender(viewer: &ViewerApp) -> LevelBuffer {
        let port = viewer.receiver.local_addr().unwrap().port();
        LevelBuffer::new("127.0.0.1", port)
    }

    /// Refresh the viewer until `done` holds
    fn refresh_until(viewer: &mut ViewerApp, done: impl Fn(&ViewerApp) -> bool) {
        let start = Instant::now();
        while !done(&*viewer) {
            assert!(start.elapsed() < Duration::from_secs(5), "viewer did not update");
            std::thread::sleep(Duration::from_millis(10));
            viewer.refresh();
        }
    }

    fn levels(time: f64, levels: &[(&str, f64)]) -> Message {
        Message::levels(time, levels).unwrap()
    }

    #[test]
    fn ranges_from_settings() {
        let mut settings = ViewerSettings::default();
        assert_eq!(settings.x_range(), XRange::Full);
        assert_eq!(settings.y_range(), YRange::Auto);
        settings.x_full = false;
        settings.y_auto = false;
        assert_eq!(settings.x_range(), XRange::Sliding(X_WIDTH));
        assert_eq!(
            settings.y_range(),
            YRange::Manual {
                low: Y_RANGE.0,
                height: Y_RANGE.1
            }
        );
    }

    #[test]
    fn selection_follows_location() {
        let mut viewer = idle_viewer();
        viewer.store.apply(levels(0.5, &[("b", 50.0)]));
        viewer.update_locations();
        assert_eq!(viewer.locations, vec!["b"]);
        assert_eq!(viewer.status.as_ref().unwrap().0, "Connection established");

        viewer.store.apply(levels(1.0, &[("a", 40.0), ("b", 51.0)]));
        viewer.update_locations();
        assert_eq!(viewer.locations, vec!["a", "b"]);
        assert_eq!(viewer.selected, 1);

        let snapshot = viewer.take_snapshot().unwrap();
        assert_eq!(snapshot.location, "b");
        assert_eq!(snapshot.points, vec![[0.5, 50.0], [1.0, 51.0]]);
        assert!(snapshot.bounds.is_some());
        assert!(snapshot.indicators.is_some());
    }

    #[test]
    fn clear_resets_view() {
        let mut viewer = idle_viewer();
        viewer.store.apply(levels(0.5, &[("a", 50.0)]));
        viewer.update_locations();
        viewer.snapshot = viewer.take_snapshot();

        viewer.clear();
        assert!(viewer.store.is_empty());
        assert!(viewer.locations.is_empty());
        assert!(viewer.snapshot.is_none());
        assert!(viewer.take_snapshot().is_none());
        assert_eq!(viewer.status.as_ref().unwrap().0, "Cleared");
    }

    #[test]
    fn received_clear_resets_view() {
        let _ = env_logger::try_init();
        let mut viewer = idle_viewer();
        let mut buffer = sender(&viewer);

        buffer.send_levels(0.5, &[("a", 50.0)]).unwrap();
        refresh_until(&mut viewer, |v| v.snapshot.is_some());
        assert_eq!(viewer.locations, vec!["a"]);

        buffer.send_clear();
        refresh_until(&mut viewer, |v| v.store.is_empty());
        assert!(viewer.locations.is_empty());
        assert!(viewer.snapshot.is_none());
        assert_eq!(viewer.status.as_ref().unwrap().0, "Cleared");

        // time restarts after the clear
        buffer.send_levels(0.5, &[("b", 45.0)]).unwrap();
        refresh_until(&mut viewer, |v| v.snapshot.is_some());
        assert_eq!(viewer.snapshot.as_ref().unwrap().location, "b");
    }

    #[test]
    fn pause_freezes_plot() {
        let mut viewer = idle_viewer();
        let mut buffer = sender(&viewer);
        buffer.send_levels(0.5, &[("a", 50.0)]).unwrap();
        refresh_until(&mut viewer, |v| v.snapshot.is_some());

        viewer.paused = true;
        buffer.send_levels(1.0, &[("a", 51.0), ("b", 40.0)]).unwrap();
        refresh_until(&mut viewer, |v| v.store.trace("a").map(|t| t.len()) == Some(2));
        assert_eq!(viewer.store.locations(), vec!["a", "b"]);
        assert_eq!(viewer.locations, vec!["a"]);
        assert_eq!(viewer.snapshot.as_ref().unwrap().points, vec![[0.5, 50.0]]);

        viewer.paused = false;
        viewer.refresh();
        assert_eq!(viewer.locations, vec!["a", "b"]);
        assert_eq!(
            viewer.snapshot.as_ref().unwrap().points,
            vec![[0.5, 50.0], [1.0, 51.0]]
        );
    }
}
