//! Adaptive code-rate selection driven by the channel-condition classifier.

use crate::metrics::ChannelCondition;
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

const CONDITION_HISTORY: usize = 100;
const SWITCH_HISTORY: usize = 10;
/// Consecutive classifications that must agree before a mode change; a single
/// outlier block cannot flip the mode.
const HYSTERESIS_WINDOW: usize = 2;

/// Error-correction operating mode. Each mode fixes a code rate; `Adaptive`
/// is the configuration default that lets the controller drive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCorrectionMode {
    Fast,
    Standard,
    HighRedundancy,
    Adaptive,
}

impl ErrorCorrectionMode {
    pub fn code_rate(self) -> f64 {
        match self {
            ErrorCorrectionMode::Fast => 0.75,
            ErrorCorrectionMode::Standard => 0.5,
            ErrorCorrectionMode::HighRedundancy => 0.33,
            ErrorCorrectionMode::Adaptive => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCorrectionMode::Fast => "fast",
            ErrorCorrectionMode::Standard => "standard",
            ErrorCorrectionMode::HighRedundancy => "high_redundancy",
            ErrorCorrectionMode::Adaptive => "adaptive",
        }
    }

    /// Mode whose fixed rate matches `rate`, for deriving the initial mode
    /// from configuration.
    pub fn from_rate(rate: f64) -> Self {
        const EPS: f64 = 1e-9;
        if (rate - 0.75).abs() < EPS {
            ErrorCorrectionMode::Fast
        } else if (rate - 0.33).abs() < EPS {
            ErrorCorrectionMode::HighRedundancy
        } else {
            ErrorCorrectionMode::Standard
        }
    }
}

/// One recorded mode transition.
#[derive(Debug, Clone, Copy)]
pub struct ModeSwitch {
    pub at: Instant,
    pub from: ErrorCorrectionMode,
    pub to: ErrorCorrectionMode,
}

/// Maps the classified channel condition to an operating mode, with
/// hysteresis so the mode follows sustained conditions rather than single
/// blocks.
pub struct AdaptationController {
    enabled: bool,
    current_mode: ErrorCorrectionMode,
    recent: VecDeque<ChannelCondition>,
    switch_history: VecDeque<ModeSwitch>,
}

impl AdaptationController {
    pub fn new(enabled: bool, initial_mode: ErrorCorrectionMode) -> Self {
        Self {
            enabled,
            current_mode: initial_mode,
            recent: VecDeque::with_capacity(CONDITION_HISTORY),
            switch_history: VecDeque::with_capacity(SWITCH_HISTORY),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_mode(&self) -> ErrorCorrectionMode {
        self.current_mode
    }

    pub fn switch_history(&self) -> impl Iterator<Item = &ModeSwitch> {
        self.switch_history.iter()
    }

    /// The mode a channel condition calls for.
    pub fn target_for(condition: ChannelCondition) -> ErrorCorrectionMode {
        match condition {
            ChannelCondition::Excellent => ErrorCorrectionMode::Fast,
            ChannelCondition::Good => ErrorCorrectionMode::Standard,
            ChannelCondition::Poor | ChannelCondition::Severe => {
                ErrorCorrectionMode::HighRedundancy
            }
        }
    }

    /// Feed one classified block. Returns the new mode when a switch is due;
    /// the caller rewrites the code parameters and invalidates the matrix
    /// cache.
    pub fn observe(&mut self, condition: ChannelCondition) -> Option<ErrorCorrectionMode> {
        if self.recent.len() == CONDITION_HISTORY {
            self.recent.pop_front();
        }
        self.recent.push_back(condition);
        if !self.enabled {
            return None;
        }

        let target = Self::target_for(condition);
        if target == self.current_mode {
            return None;
        }
        let settled = self.recent.len() >= HYSTERESIS_WINDOW
            && self
                .recent
                .iter()
                .rev()
                .take(HYSTERESIS_WINDOW)
                .all(|&c| Self::target_for(c) == target);
        if !settled {
            return None;
        }

        let from = self.current_mode;
        self.current_mode = target;
        if self.switch_history.len() == SWITCH_HISTORY {
            self.switch_history.pop_front();
        }
        self.switch_history.push_back(ModeSwitch {
            at: Instant::now(),
            from,
            to: target,
        });
        info!(
            "error correction mode {} -> {} (channel {:?})",
            from.as_str(),
            target.as_str(),
            condition
        );
        crate::telemetry::MODE_SWITCHES.inc();
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_condition_switches_mode() {
        let mut ctl = AdaptationController::new(true, ErrorCorrectionMode::Standard);
        assert_eq!(ctl.observe(ChannelCondition::Severe), None);
        assert_eq!(
            ctl.observe(ChannelCondition::Severe),
            Some(ErrorCorrectionMode::HighRedundancy)
        );
        assert_eq!(ctl.current_mode(), ErrorCorrectionMode::HighRedundancy);
        assert_eq!(ctl.switch_history().count(), 1);
    }

    #[test]
    fn single_outlier_does_not_switch() {
        let mut ctl = AdaptationController::new(true, ErrorCorrectionMode::Standard);
        for _ in 0..5 {
            assert_eq!(ctl.observe(ChannelCondition::Good), None);
        }
        // One excellent block in a run of good ones must not flip the mode.
        assert_eq!(ctl.observe(ChannelCondition::Excellent), None);
        assert_eq!(ctl.observe(ChannelCondition::Good), None);
        assert_eq!(ctl.current_mode(), ErrorCorrectionMode::Standard);
    }

    #[test]
    fn disabled_controller_never_switches() {
        let mut ctl = AdaptationController::new(false, ErrorCorrectionMode::Standard);
        for _ in 0..10 {
            assert_eq!(ctl.observe(ChannelCondition::Severe), None);
        }
        assert_eq!(ctl.current_mode(), ErrorCorrectionMode::Standard);
    }

    #[test]
    fn mode_rates() {
        assert!((ErrorCorrectionMode::Fast.code_rate() - 0.75).abs() < 1e-9);
        assert!((ErrorCorrectionMode::Standard.code_rate() - 0.5).abs() < 1e-9);
        assert!((ErrorCorrectionMode::HighRedundancy.code_rate() - 0.33).abs() < 1e-9);
        assert_eq!(
            ErrorCorrectionMode::from_rate(0.75),
            ErrorCorrectionMode::Fast
        );
    }
}
