use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PageNumber = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

#[derive(Debug, Error)]
#[error("rotation must be one of 0, 90, 180 or 270 degrees (got {0})")]
pub struct InvalidRotation(pub u16);

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Normalises any multiple of 90 (negative values included) into a rotation.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn clockwise(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    pub fn counter_clockwise(self) -> Self {
        self.clockwise().clockwise().clockwise()
    }

    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = InvalidRotation;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    #[default]
    Single,
    Dual,
    Continuous,
    TwoPage,
    Presentation,
}

impl ViewMode {
    pub fn is_paired(self) -> bool {
        matches!(self, ViewMode::Dual | ViewMode::TwoPage)
    }

    pub fn step(self) -> usize {
        if self.is_paired() {
            2
        } else {
            1
        }
    }

    pub fn cycled(self) -> ViewMode {
        match self {
            ViewMode::Single => ViewMode::Continuous,
            ViewMode::Continuous => ViewMode::TwoPage,
            ViewMode::TwoPage => ViewMode::Dual,
            ViewMode::Dual => ViewMode::Presentation,
            ViewMode::Presentation => ViewMode::Single,
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ViewMode::Single => "single",
            ViewMode::Dual => "dual",
            ViewMode::Continuous => "continuous",
            ViewMode::TwoPage => "two-page",
            ViewMode::Presentation => "presentation",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub const A4: PageSize = PageSize {
        width_pt: 595.0,
        height_pt: 842.0,
    };

    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self {
            width_pt,
            height_pt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub rotation: Rotation,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Viewport {
    pub fn for_page(size: PageSize, scale: f32, rotation: Rotation) -> Self {
        let (width, height) = if rotation.is_sideways() {
            (size.height_pt, size.width_pt)
        } else {
            (size.width_pt, size.height_pt)
        };
        Self {
            scale,
            rotation,
            pixel_width: to_pixels(width * scale),
            pixel_height: to_pixels(height * scale),
        }
    }

    pub fn device_size(&self, device_pixel_ratio: f32) -> (u32, u32) {
        let ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        (
            to_pixels(self.pixel_width as f32 * ratio),
            to_pixels(self.pixel_height as f32 * ratio),
        )
    }

    pub fn unrotated_size(&self) -> (f32, f32) {
        let width = self.pixel_width as f32 / self.scale;
        let height = self.pixel_height as f32 / self.scale;
        if self.rotation.is_sideways() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

fn to_pixels(value: f32) -> u32 {
    if !value.is_finite() || value < 1.0 {
        1
    } else if value > u32::MAX as f32 {
        u32::MAX
    } else {
        value.ceil() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            left: self.left * factor,
            top: self.top * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Rotates a rect laid out on a `page_width` x `page_height` page
    /// (already scaled) into the rotated page's coordinate space.
    pub fn rotated(&self, rotation: Rotation, page_width: f32, page_height: f32) -> Self {
        match rotation {
            Rotation::Deg0 => *self,
            Rotation::Deg90 => Self::new(
                page_height - self.top - self.height,
                self.left,
                self.height,
                self.width,
            ),
            Rotation::Deg180 => Self::new(
                page_width - self.left - self.width,
                page_height - self.top - self.height,
                self.width,
                self.height,
            ),
            Rotation::Deg270 => Self::new(
                self.top,
                page_width - self.left - self.width,
                self.height,
                self.width,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform(pub [f32; 6]);

impl Transform {
    pub fn new(scale_x: f32, scale_y: f32, translate_x: f32, translate_y: f32) -> Self {
        Self([scale_x, 0.0, 0.0, scale_y, translate_x, translate_y])
    }

    pub fn scale_x(&self) -> f32 {
        self.0[0]
    }

    pub fn scale_y(&self) -> f32 {
        self.0[3]
    }

    pub fn translate_x(&self) -> f32 {
        self.0[4]
    }

    pub fn translate_y(&self) -> f32 {
        self.0[5]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub transform: Transform,
    pub width: f32,
    pub page: PageNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationReason {
    User,
    Search,
    Outline,
    Keyboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationTarget {
    pub page: PageNumber,
    pub reason: NavigationReason,
}

impl NavigationTarget {
    pub fn new(page: PageNumber, reason: NavigationReason) -> Self {
        Self { page, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_normalises_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!(Rotation::Deg270.clockwise(), Rotation::Deg0);
        assert_eq!(Rotation::Deg0.counter_clockwise(), Rotation::Deg270);
    }

    #[test]
    fn viewport_swaps_dimensions_when_sideways() {
        let upright = Viewport::for_page(PageSize::A4, 1.0, Rotation::Deg0);
        let sideways = Viewport::for_page(PageSize::A4, 1.0, Rotation::Deg90);
        assert_eq!((upright.pixel_width, upright.pixel_height), (595, 842));
        assert_eq!((sideways.pixel_width, sideways.pixel_height), (842, 595));
        assert_eq!(sideways.unrotated_size(), (595.0, 842.0));
    }

    #[test]
    fn viewport_dimensions_never_collapse_to_zero() {
        let viewport = Viewport::for_page(PageSize::new(0.0, 0.0), 0.0001, Rotation::Deg0);
        assert_eq!(viewport.pixel_width, 1);
        assert_eq!(viewport.pixel_height, 1);
        assert_eq!(viewport.device_size(f32::NAN), (1, 1));
    }

    #[test]
    fn rect_rotation_keeps_rect_inside_page() {
        let rect = PixelRect::new(10.0, 20.0, 30.0, 5.0);
        let turned = rect.rotated(Rotation::Deg90, 100.0, 200.0);
        assert_eq!(turned, PixelRect::new(175.0, 10.0, 5.0, 30.0));
        let flipped = rect.rotated(Rotation::Deg180, 100.0, 200.0);
        assert_eq!(flipped, PixelRect::new(60.0, 175.0, 30.0, 5.0));
    }

    #[test]
    fn rotation_round_trips_through_serde() {
        let json = serde_json::to_string(&Rotation::Deg180).unwrap();
        assert_eq!(json, "180");
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }
}
