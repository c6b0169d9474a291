//! GhostWatch TUI Map
//! ===================
//!
//! Terminal rendering surface for the fleet runtime.
//! Uses Ratatui for drawing and Crossbeam to carry marker commands from the
//! runtime task to the UI thread.
//!
//! Enable with the `dashboard` feature flag.
//!
//! Features:
//! - Braille canvas map, active vehicles in green, ghosts in red
//! - Feed status and real/ghost counts in the header
//! - Ghost list (id, route, position)
//! - Keys: `g` hide/show ghosts, arrows pan, `+`/`-` zoom, `q` quit
//!
//! Pan and zoom live here and only here: the runtime hands over the initial
//! viewport at mount and never sees it again.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Points},
        Block, Borders, Paragraph, Row, Table,
    },
    Frame, Terminal,
};
use tokio::sync::watch;
use tracing::debug;

use crate::config::MAX_ZOOM;
use crate::filter::FilterControl;
use crate::runtime::FeedStatus;
use crate::surface::SurfaceOp;
use crate::vehicle::GeoPoint;
use crate::view::{MarkerIcon, MarkerSpec, RenderSurface, Viewport};

/// Fraction of the visible span moved by one arrow key press.
const PAN_FRACTION: f64 = 0.1;

// =============================================================================
// TERMINAL SURFACE (runtime side)
// =============================================================================

/// `RenderSurface` that forwards every call to the UI thread.
pub struct TerminalSurface {
    tx: Sender<SurfaceOp>,
}

/// Creates the surface for the runtime and the command receiver for the map.
pub fn terminal_channel() -> (TerminalSurface, Receiver<SurfaceOp>) {
    let (tx, rx) = unbounded();
    (TerminalSurface { tx }, rx)
}

impl TerminalSurface {
    fn forward(&self, op: SurfaceOp) {
        if self.tx.send(op).is_err() {
            debug!("Map UI gone; dropping surface command");
        }
    }
}

impl RenderSurface for TerminalSurface {
    fn mount(&mut self, viewport: Viewport) {
        self.forward(SurfaceOp::Mount(viewport));
    }

    fn upsert_marker(&mut self, id: &str, marker: &MarkerSpec) {
        self.forward(SurfaceOp::Upsert(id.to_string(), marker.clone()));
    }

    fn remove_marker(&mut self, id: &str) {
        self.forward(SurfaceOp::Remove(id.to_string()));
    }
}

// =============================================================================
// MAP GEOMETRY
// =============================================================================

/// Longitude span shown at `zoom` (whole world at zoom 0).
pub fn lon_span(zoom: f64) -> f64 {
    360.0 / 2f64.powf(zoom)
}

/// `([lon_min, lon_max], [lat_min, lat_max])` visible around the viewport.
///
/// `aspect` is height/width of the drawing area in degrees; terminal cells
/// are about twice as tall as wide, so 0.5 is a good default.
pub fn visible_bounds(viewport: &Viewport, aspect: f64) -> ([f64; 2], [f64; 2]) {
    let half_lon = lon_span(viewport.zoom) / 2.0;
    let half_lat = half_lon * aspect;
    let c = viewport.center;
    (
        [c.lon - half_lon, c.lon + half_lon],
        [(c.lat - half_lat).max(-90.0), (c.lat + half_lat).min(90.0)],
    )
}

/// Moves the center by whole pan steps, clamped to valid coordinates.
pub fn pan(viewport: Viewport, lat_steps: i32, lon_steps: i32) -> Viewport {
    let step = lon_span(viewport.zoom) * PAN_FRACTION;
    let lat = (viewport.center.lat + step * lat_steps as f64).clamp(-85.0, 85.0);
    let mut lon = viewport.center.lon + step * lon_steps as f64;
    if lon > 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }
    Viewport::new(GeoPoint { lat, lon }, viewport.zoom)
}

/// Changes zoom by `delta` levels, clamped to the tile range.
pub fn zoom_by(viewport: Viewport, delta: f64) -> Viewport {
    Viewport::new(viewport.center, (viewport.zoom + delta).clamp(0.0, MAX_ZOOM))
}

// =============================================================================
// MAP DASHBOARD (UI side)
// =============================================================================

/// What a key press asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Continue,
    Quit,
}

/// TUI map driven by `SurfaceOp`s from a `TerminalSurface`.
pub struct MapDashboard {
    rx: Receiver<SurfaceOp>,
    filter: FilterControl,
    status: watch::Receiver<FeedStatus>,
    shutdown: watch::Sender<bool>,
    /// None until the runtime mounts the map
    viewport: Option<Viewport>,
    markers: BTreeMap<String, MarkerSpec>,
    /// Set once the TerminalSurface has been dropped
    runtime_gone: bool,
}

impl MapDashboard {
    pub fn new(
        rx: Receiver<SurfaceOp>,
        filter: FilterControl,
        status: watch::Receiver<FeedStatus>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            rx,
            filter,
            status,
            shutdown,
            viewport: None,
            markers: BTreeMap::new(),
            runtime_gone: false,
        }
    }

    /// Applies one surface command.
    pub fn apply(&mut self, op: SurfaceOp) {
        match op {
            SurfaceOp::Mount(viewport) => {
                if self.viewport.is_none() {
                    self.viewport = Some(viewport);
                }
            }
            SurfaceOp::Upsert(id, marker) => {
                self.markers.insert(id, marker);
            }
            SurfaceOp::Remove(id) => {
                self.markers.remove(&id);
            }
        }
    }

    /// Applies all pending commands without blocking.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(op) => {
                    self.apply(op);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.runtime_gone = true;
                    break;
                }
            }
        }
        applied
    }

    pub fn handle_key(&mut self, code: KeyCode) -> KeyAction {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.shutdown.send_replace(true);
                return KeyAction::Quit;
            }
            KeyCode::Char('g') => {
                self.filter.toggle_hide_ghosts();
            }
            KeyCode::Up => self.move_view(|v| pan(v, 1, 0)),
            KeyCode::Down => self.move_view(|v| pan(v, -1, 0)),
            KeyCode::Left => self.move_view(|v| pan(v, 0, -1)),
            KeyCode::Right => self.move_view(|v| pan(v, 0, 1)),
            KeyCode::Char('+') | KeyCode::Char('=') => self.move_view(|v| zoom_by(v, 1.0)),
            KeyCode::Char('-') => self.move_view(|v| zoom_by(v, -1.0)),
            _ => {}
        }
        KeyAction::Continue
    }

    fn move_view(&mut self, f: impl FnOnce(Viewport) -> Viewport) {
        if let Some(viewport) = self.viewport {
            self.viewport = Some(f(viewport));
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn markers(&self) -> &BTreeMap<String, MarkerSpec> {
        &self.markers
    }

    /// Displayed ghost markers, in id order.
    pub fn ghosts(&self) -> impl Iterator<Item = (&str, &MarkerSpec)> {
        self.markers
            .iter()
            .filter(|(_, m)| m.icon == MarkerIcon::Ghost)
            .map(|(id, m)| (id.as_str(), m))
    }

    /// Run the TUI main loop (blocks until 'q' pressed)
    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        // Restore terminal even if drawing failed
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
        loop {
            self.drain();

            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    // Raw mode swallows SIGINT
                    let code = if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                        KeyCode::Char('q')
                    } else {
                        key.code
                    };
                    if key.kind == KeyEventKind::Press && self.handle_key(code) == KeyAction::Quit {
                        return Ok(());
                    }
                }
            }

            // Runtime stopped on its own
            if self.runtime_gone {
                return Ok(());
            }
        }
    }

    fn ui(&self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(10),   // Map + ghost list
                Constraint::Length(1), // Footer
            ])
            .split(f.area());

        // === HEADER ===
        let status = *self.status.borrow();
        let status_color = match status {
            FeedStatus::Live => Color::Green,
            FeedStatus::Connecting => Color::Cyan,
            FeedStatus::Stale => Color::Yellow,
            FeedStatus::Disconnected => Color::Red,
        };
        let ghosts = self.ghosts().count();
        let hidden = self.filter.current().hide_ghosts;
        let header = Paragraph::new(Line::from(vec![
            Span::styled("GhostWatch", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::styled(
                format!("feed: {}", status.to_string().to_uppercase()),
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  |  "),
            Span::raw(format!("{} shown, {} ghost", self.markers.len(), ghosts)),
            Span::raw("  |  "),
            Span::styled(
                if hidden { "ghosts hidden" } else { "ghosts shown" },
                Style::default().fg(Color::Cyan),
            ),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));
        f.render_widget(header, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
            .split(chunks[1]);

        // === MAP ===
        let viewport = self.viewport.unwrap_or_default();
        let (x_bounds, y_bounds) = visible_bounds(&viewport, 0.5);
        let active: Vec<(f64, f64)> = self
            .markers
            .values()
            .filter(|m| m.icon == MarkerIcon::Active)
            .map(|m| (m.position.lon, m.position.lat))
            .collect();
        let ghost_points: Vec<(f64, f64)> = self
            .ghosts()
            .map(|(_, m)| (m.position.lon, m.position.lat))
            .collect();
        let title = format!(
            "Map ({:.4}, {:.4}) z{:.0}",
            viewport.center.lat, viewport.center.lon, viewport.zoom
        );
        let map = Canvas::default()
            .block(Block::default().title(title).borders(Borders::ALL))
            .marker(symbols::Marker::Braille)
            .x_bounds(x_bounds)
            .y_bounds(y_bounds)
            .paint(|ctx| {
                ctx.draw(&Points {
                    coords: &active,
                    color: Color::Green,
                });
                ctx.draw(&Points {
                    coords: &ghost_points,
                    color: Color::Red,
                });
            });
        f.render_widget(map, body[0]);

        // === GHOST LIST ===
        let header_cells = ["ID", "Route", "Lat", "Lon"]
            .iter()
            .map(|h| Span::styled(*h, Style::default().add_modifier(Modifier::BOLD)));
        let header = Row::new(header_cells).height(1);
        let rows: Vec<Row> = self
            .ghosts()
            .map(|(id, m)| {
                Row::new(vec![
                    Span::styled(id.to_string(), Style::default().fg(Color::Red)),
                    Span::raw(m.route.clone()),
                    Span::raw(format!("{:.4}", m.position.lat)),
                    Span::raw(format!("{:.4}", m.position.lon)),
                ])
            })
            .collect();
        let table = Table::new(
            rows,
            [
                Constraint::Length(8),
                Constraint::Length(6),
                Constraint::Length(9),
                Constraint::Length(9),
            ],
        )
        .header(header)
        .block(Block::default().title("Ghost vehicles").borders(Borders::ALL));
        f.render_widget(table, body[1]);

        // === FOOTER ===
        let footer = Paragraph::new("g: hide/show ghosts  arrows: pan  +/-: zoom  q: quit")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(footer, chunks[2]);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{filter_channel, DisplayFilter};
    use approx::assert_relative_eq;

    fn marker(lat: f64, icon: MarkerIcon) -> MarkerSpec {
        MarkerSpec {
            position: GeoPoint::new(lat, -74.0).unwrap(),
            icon,
            route: "B1".to_string(),
        }
    }

    fn dashboard() -> (MapDashboard, TerminalSurface, watch::Receiver<DisplayFilter>, watch::Receiver<bool>) {
        let (surface, rx) = terminal_channel();
        let (control, filter_rx) = filter_channel(DisplayFilter::default());
        let (_status_tx, status_rx) = watch::channel(FeedStatus::Live);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (MapDashboard::new(rx, control, status_rx, shutdown_tx), surface, filter_rx, shutdown_rx)
    }

    #[test]
    fn test_surface_commands_reach_dashboard() {
        let (mut dash, mut surface, _, _) = dashboard();
        surface.mount(Viewport::default());
        surface.upsert_marker("1", &marker(40.71, MarkerIcon::Active));
        surface.upsert_marker("2", &marker(40.72, MarkerIcon::Ghost));
        surface.remove_marker("1");

        assert_eq!(dash.drain(), 4);
        drop(surface);
        dash.drain();
        assert!(dash.runtime_gone);
        assert_eq!(dash.viewport(), Some(Viewport::default()));
        assert_eq!(dash.markers().len(), 1);
        assert_eq!(dash.ghosts().map(|(id, _)| id).collect::<Vec<_>>(), vec!["2"]);
    }

    #[test]
    fn test_user_viewport_survives_remount() {
        let (mut dash, _, _, _) = dashboard();
        dash.apply(SurfaceOp::Mount(Viewport::default()));
        dash.handle_key(KeyCode::Char('+'));
        dash.apply(SurfaceOp::Mount(Viewport::default()));
        assert_relative_eq!(dash.viewport().unwrap().zoom, 13.0);
    }

    #[test]
    fn test_keys() {
        let (mut dash, _, filter_rx, shutdown_rx) = dashboard();
        dash.apply(SurfaceOp::Mount(Viewport::default()));

        assert_eq!(dash.handle_key(KeyCode::Char('g')), KeyAction::Continue);
        assert!(filter_rx.borrow().hide_ghosts);

        dash.handle_key(KeyCode::Up);
        assert!(dash.viewport().unwrap().center.lat > Viewport::default().center.lat);

        assert_eq!(dash.handle_key(KeyCode::Char('q')), KeyAction::Quit);
        assert!(*shutdown_rx.borrow());
    }

    #[test]
    fn test_geometry_helpers() {
        assert_relative_eq!(lon_span(0.0), 360.0);
        assert_relative_eq!(lon_span(1.0), 180.0);

        let (x, y) = visible_bounds(&Viewport::default(), 0.5);
        assert!(x[0] < -74.0060 && -74.0060 < x[1]);
        assert!(y[0] < 40.7128 && 40.7128 < y[1]);

        let max = zoom_by(Viewport::default(), 100.0);
        assert_relative_eq!(max.zoom, MAX_ZOOM);
        let min = zoom_by(Viewport::default(), -100.0);
        assert_relative_eq!(min.zoom, 0.0);

        let far_east = Viewport::new(GeoPoint { lat: 0.0, lon: 179.99 }, 0.0);
        let wrapped = pan(far_east, 0, 1);
        assert!(wrapped.center.lon < 0.0);
    }
}
