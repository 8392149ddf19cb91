use serde::{Deserialize, Serialize};

use crate::types::ViewMode;

pub const STANDARD_PAGE_WIDTH_PT: f32 = 595.0;
pub const FIT_WIDTH_RATIO: f32 = 0.85;
pub const ZOOM_IN_FACTOR: f32 = 1.1;
pub const ZOOM_OUT_FACTOR: f32 = 0.9;

/// The two zoom controls keep independent ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomControl {
    #[default]
    Viewer,
    Toolbar,
}

impl ZoomControl {
    pub fn range(self) -> (f32, f32) {
        match self {
            ZoomControl::Viewer => (0.5, 3.0),
            ZoomControl::Toolbar => (0.3, 2.0),
        }
    }

    pub fn clamp(self, scale: f32) -> f32 {
        let (min, max) = self.range();
        scale.clamp(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRequest {
    pub container_width_px: f32,
    pub view_mode: ViewMode,
    pub fit_to_width: bool,
    pub explicit_scale: f32,
    pub zoom: ZoomControl,
    pub standard_page_width_pt: f32,
    pub fit_ratio: f32,
}

impl ScaleRequest {
    pub fn fit_width(container_width_px: f32, view_mode: ViewMode) -> Self {
        Self {
            container_width_px,
            view_mode,
            fit_to_width: true,
            ..Self::default()
        }
    }

    pub fn explicit(scale: f32, zoom: ZoomControl) -> Self {
        Self {
            explicit_scale: scale,
            zoom,
            ..Self::default()
        }
    }
}

impl Default for ScaleRequest {
    fn default() -> Self {
        Self {
            container_width_px: 0.0,
            view_mode: ViewMode::Single,
            fit_to_width: false,
            explicit_scale: 1.0,
            zoom: ZoomControl::Viewer,
            standard_page_width_pt: STANDARD_PAGE_WIDTH_PT,
            fit_ratio: FIT_WIDTH_RATIO,
        }
    }
}

/// Pure scale computation. Degenerate inputs yield `last_good` instead of a
/// zero, negative or non-finite scale.
pub fn compute_scale(request: &ScaleRequest, last_good: f32) -> f32 {
    if !request.fit_to_width {
        if !request.explicit_scale.is_finite() || request.explicit_scale <= 0.0 {
            return last_good;
        }
        return request.zoom.clamp(request.explicit_scale);
    }

    if !request.container_width_px.is_finite()
        || request.container_width_px <= 0.0
        || !request.standard_page_width_pt.is_finite()
        || request.standard_page_width_pt <= 0.0
    {
        return last_good;
    }

    let mut usable = request.container_width_px * request.fit_ratio;
    if request.view_mode.is_paired() {
        usable /= 2.0;
    }
    let scale = usable / request.standard_page_width_pt;
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        last_good
    }
}

#[derive(Debug, Clone)]
pub struct ScaleCalculator {
    last_good: f32,
}

impl ScaleCalculator {
    pub fn new(initial: f32) -> Self {
        let last_good = if initial.is_finite() && initial > 0.0 {
            initial
        } else {
            1.0
        };
        Self { last_good }
    }

    pub fn last_good(&self) -> f32 {
        self.last_good
    }

    pub fn compute(&mut self, request: &ScaleRequest) -> f32 {
        let scale = compute_scale(request, self.last_good);
        self.last_good = scale;
        scale
    }
}

impl Default for ScaleCalculator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_width_is_deterministic() {
        let request = ScaleRequest::fit_width(1000.0, ViewMode::Single);
        let first = compute_scale(&request, 1.0);
        let second = compute_scale(&request, 1.0);
        assert_eq!(first, second);
        assert!((first - 1000.0 * 0.85 / 595.0).abs() < 1e-6);
    }

    #[test]
    fn paired_modes_halve_the_fit_scale() {
        let single = compute_scale(&ScaleRequest::fit_width(1000.0, ViewMode::Single), 1.0);
        let two_page = compute_scale(&ScaleRequest::fit_width(1000.0, ViewMode::TwoPage), 1.0);
        let dual = compute_scale(&ScaleRequest::fit_width(1000.0, ViewMode::Dual), 1.0);
        assert!((two_page - single / 2.0).abs() < 1e-6);
        assert_eq!(two_page, dual);
    }

    #[test]
    fn explicit_scale_uses_the_control_range() {
        let viewer = compute_scale(&ScaleRequest::explicit(5.0, ZoomControl::Viewer), 1.0);
        let toolbar = compute_scale(&ScaleRequest::explicit(5.0, ZoomControl::Toolbar), 1.0);
        assert_eq!(viewer, 3.0);
        assert_eq!(toolbar, 2.0);

        let viewer_low = compute_scale(&ScaleRequest::explicit(0.1, ZoomControl::Viewer), 1.0);
        let toolbar_low = compute_scale(&ScaleRequest::explicit(0.1, ZoomControl::Toolbar), 1.0);
        assert_eq!(viewer_low, 0.5);
        assert_eq!(toolbar_low, 0.3);
    }

    #[test]
    fn degenerate_container_keeps_last_good_scale() {
        let mut calculator = ScaleCalculator::new(1.0);
        let good = calculator.compute(&ScaleRequest::fit_width(800.0, ViewMode::Single));
        let degenerate = calculator.compute(&ScaleRequest::fit_width(0.0, ViewMode::Single));
        let negative = calculator.compute(&ScaleRequest::fit_width(-20.0, ViewMode::Single));
        assert_eq!(degenerate, good);
        assert_eq!(negative, good);
    }
}
