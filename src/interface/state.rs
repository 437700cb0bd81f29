use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;
use nalgebra::DMatrix;
use ratatui::widgets::TableState;

use crate::core::config::SessionConfig;
use crate::core::curve::CurveData;
use crate::engine::adapter::ParetoPoint;
use crate::engine::expression::Expression;
use crate::session::controller::SessionHandle;
use crate::session::SessionState;

// --- Constants ---
const FIT_SAMPLES: usize = 200;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Dashboard,
    Pareto,
    Config,
}

// --- The Master State ---

/// Everything the renderer needs, refreshed from `SessionHandle::snapshot`
/// once per tick. The UI thread never touches worker-owned data directly.
pub struct AppState {
    // System
    pub should_quit: bool,
    pub mode: AppMode,
    pub config: SessionConfig,
    pub engine_name: String,

    // Session
    handle: SessionHandle,
    pub session: SessionState,

    // Plot data
    pub data_points: Vec<(f64, f64)>,
    pub fitted_points: Vec<(f64, f64)>,
    fitted_for: String,
    curve: Arc<CurveData>,
    constants: BTreeMap<String, f64>,

    // Pareto
    pub pareto: Vec<ParetoPoint>,
    pub pareto_error: Option<String>,
    pareto_fetched_final: bool,
    pub pareto_state: TableState,
}

impl AppState {
    pub fn new(handle: SessionHandle, curve: Arc<CurveData>, config: SessionConfig, engine_name: &str) -> Self {
        let data_points = curve
            .x()
            .column(0)
            .iter()
            .zip(curve.y())
            .map(|(&x, &y)| (x, y))
            .collect();
        let constants = config.allowed_constants();
        let session = handle.snapshot();

        Self {
            should_quit: false,
            mode: AppMode::Dashboard,
            config,
            engine_name: engine_name.to_string(),
            handle,
            session,
            data_points,
            fitted_points: Vec::new(),
            fitted_for: String::new(),
            curve,
            constants,
            pareto: Vec::new(),
            pareto_error: None,
            pareto_fetched_final: false,
            pareto_state: TableState::default(),
        }
    }

    pub fn curve(&self) -> &CurveData {
        &self.curve
    }

    /// Pulls a fresh snapshot; recomputes derived plot data only when the
    /// published version moved.
    pub fn tick(&mut self) {
        let next = self.handle.snapshot();
        let changed = next.version != self.session.version || next.status != self.session.status;
        self.session = next;

        if changed && self.session.best_expression != self.fitted_for {
            self.refresh_fit();
        }
        if self.session.status.is_terminal() && !self.pareto_fetched_final {
            self.pareto_fetched_final = true;
            self.refresh_pareto();
        }
    }

    fn refresh_fit(&mut self) {
        self.fitted_for = self.session.best_expression.clone();
        self.fitted_points.clear();
        if self.fitted_for.is_empty() || self.curve.dims() != 1 {
            return;
        }

        let expr = match Expression::parse(&self.fitted_for) {
            Ok(e) => e,
            Err(e) => {
                warn!("Best expression not plottable: {}", e);
                return;
            }
        };

        let (lo, hi) = self.curve.x_range();
        let step = (hi - lo) / (FIT_SAMPLES - 1) as f64;
        let grid: Vec<f64> = (0..FIT_SAMPLES).map(|i| lo + step * i as f64).collect();
        let inputs = DMatrix::from_column_slice(FIT_SAMPLES, 1, &grid);

        match expr.evaluate_rows(&inputs, &self.constants) {
            Ok(values) => {
                self.fitted_points = grid
                    .into_iter()
                    .zip(values)
                    .filter(|(_, y)| y.is_finite())
                    .collect();
            }
            Err(e) => warn!("Best expression not plottable: {}", e),
        }
    }

    /// Asks the engine for its current frontier. May block on a busy engine,
    /// so it runs only on request or once the session has ended.
    pub fn refresh_pareto(&mut self) {
        match self.handle.pareto_frontier() {
            Ok(points) => {
                self.pareto = points;
                self.pareto_error = None;
                if self.pareto.is_empty() {
                    self.pareto_state.select(None);
                } else if self.pareto_state.selected().is_none() {
                    self.pareto_state.select(Some(0));
                }
            }
            Err(e) => self.pareto_error = Some(e.to_string()),
        }
    }

    // --- Input Handling ---

    pub fn on_key(&mut self, key: char) {
        match key {
            'q' => self.quit(),
            's' => self.handle.request_stop(),
            '1' => self.mode = AppMode::Dashboard,
            '2' => self.mode = AppMode::Pareto,
            '3' => self.mode = AppMode::Config,
            'p' => self.refresh_pareto(),
            'j' => self.select_next(),
            'k' => self.select_prev(),
            _ => {}
        }
    }

    /// Stops the session (if still live) before leaving.
    pub fn quit(&mut self) {
        if self.session.status.is_active() {
            self.handle.request_stop();
        }
        self.should_quit = true;
    }

    fn select_next(&mut self) {
        if self.pareto.is_empty() { return; }
        let i = match self.pareto_state.selected() {
            Some(i) => if i >= self.pareto.len() - 1 { 0 } else { i + 1 },
            None => 0,
        };
        self.pareto_state.select(Some(i));
    }

    fn select_prev(&mut self) {
        if self.pareto.is_empty() { return; }
        let i = match self.pareto_state.selected() {
            Some(i) => if i == 0 { self.pareto.len() - 1 } else { i - 1 },
            None => 0,
        };
        self.pareto_state.select(Some(i));
    }
}
