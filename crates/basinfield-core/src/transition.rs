//! Frame-by-frame parameter tweening owned by the driver loop.

use crate::params::SimulationParameters;

/// Lifecycle of a parameter transition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TransitionState {
    #[default]
    Idle,
    Running {
        from: SimulationParameters,
        to: SimulationParameters,
        frame: u32,
        frames: u32,
    },
    Completed,
    Cancelled,
}

/// At most one in-flight interpolation between two parameter sets.
#[derive(Debug, Clone, Default)]
pub struct ParameterTransition {
    state: TransitionState,
}

impl ParameterTransition {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: TransitionState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &TransitionState {
        &self.state
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, TransitionState::Running { .. })
    }

    /// Begin tweening from `from` to `to` over `frames` frames, replacing any running transition.
    pub fn start(&mut self, from: SimulationParameters, to: SimulationParameters, frames: u32) {
        self.cancel();
        self.state = TransitionState::Running {
            from,
            to,
            frame: 0,
            frames: frames.max(1),
        };
    }

    /// Parameters for the next frame, or `None` when nothing is running.
    pub fn advance(&mut self) -> Option<SimulationParameters> {
        let TransitionState::Running {
            from,
            to,
            frame,
            frames,
        } = self.state
        else {
            return None;
        };
        let frame = frame + 1;
        let params = from.lerp(&to, f64::from(frame) / f64::from(frames));
        self.state = if frame >= frames {
            TransitionState::Completed
        } else {
            TransitionState::Running {
                from,
                to,
                frame,
                frames,
            }
        };
        Some(params)
    }

    /// Drop a running transition; a finished or idle one is left alone.
    pub fn cancel(&mut self) -> bool {
        if self.is_running() {
            self.state = TransitionState::Cancelled;
            true
        } else {
            false
        }
    }
}
