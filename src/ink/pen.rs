//! Pen physics model
//!
//! Converts raw per-sample stroke inputs (speed, direction, width, pressure)
//! into the width, color and opacity of each rendered stroke segment. Every
//! pen kind owns exactly one width formula and one opacity/color derivation;
//! the formulas are empirically tuned to look like the tablet's own output.
//!
//! Sample values arrive pre-scaled by the scene provider: `speed` is stored
//! ×4, `width` is stored ×4, `pressure` is in `[0, 255]`, and `direction` is
//! normalized to `[0, 255]` (see [`direction_to_tilt`]).

use std::f32::consts::PI;

use image::{Rgb, Rgba};

use super::error::PenError;

/// Scale between the stored pencil width and on-page pixels
pub const MAGIC_PENCIL_SIZE: f32 = 44.6 * 2.3;

/// Segment length used by pens without their own thinning granularity
pub const DEFAULT_SEGMENT_LENGTH: u32 = 1000;

/// Tablet color ids 0..=8
const PALETTE: [[u8; 3]; 9] = [
    [0, 0, 0],       // black
    [125, 125, 125], // gray
    [255, 255, 255], // white
    [255, 255, 99],  // yellow
    [0, 255, 0],     // green
    [255, 20, 147],  // pink
    [0, 98, 204],    // blue
    [217, 7, 7],     // red
    [125, 125, 125], // gray overlap
];

const WHITE_COLOR_ID: u32 = 2;
const HIGHLIGHTER_WIDTH: f32 = 15.0;

/// Convert the byte-normalized direction back to radians
#[inline]
#[must_use]
pub fn direction_to_tilt(direction: f32) -> f32 {
    direction * (PI * 2.0) / 255.0
}

/// Clamp into `[0, 1]`; NaN collapses to 0
#[inline]
#[must_use]
pub fn cutoff(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Look up a palette color by its tablet color id
pub fn palette_color(color_id: u32) -> Result<Rgb<u8>, PenError> {
    PALETTE
        .get(color_id as usize)
        .map(|&rgb| Rgb(rgb))
        .ok_or(PenError::UnknownColor { color_id })
}

/// Raw physical inputs of one stroke point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StrokeSample {
    pub speed: f32,
    /// Direction normalized to `[0, 255]`
    pub direction: f32,
    /// Width hint, stored ×4
    pub width: f32,
    /// Pressure in `[0, 255]`
    pub pressure: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineCap {
    Round,
    Square,
}

/// Rendered appearance of one stroke segment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub width: f32,
    pub color: Rgba<u8>,
    pub opacity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenKind {
    Fineliner,
    /// Alternates a solid narrow pass and a lighter wide pass to emulate ink pooling
    Ballpoint { alternate: bool },
    Marker,
    Pencil,
    MechanicalPencil,
    Brush,
    Highlighter,
    Eraser,
    EraseArea,
    Calligraphy,
}

impl PenKind {
    pub fn name(&self) -> &'static str {
        match self {
            PenKind::Fineliner => "Fineliner",
            PenKind::Ballpoint { .. } => "Ballpoint",
            PenKind::Marker => "Marker",
            PenKind::Pencil => "Pencil",
            PenKind::MechanicalPencil => "Mechanical Pencil",
            PenKind::Brush => "Brush",
            PenKind::Highlighter => "Highlighter",
            PenKind::Eraser => "Eraser",
            PenKind::EraseArea => "Erase Area",
            PenKind::Calligraphy => "Calligraphy",
        }
    }

    /// Lower bound on any width this kind produces
    #[must_use]
    pub fn min_width(&self) -> f32 {
        match self {
            PenKind::Pencil => 3.0,
            PenKind::MechanicalPencil => 5.0,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn line_cap(&self) -> LineCap {
        match self {
            PenKind::Highlighter | PenKind::Eraser | PenKind::EraseArea => LineCap::Square,
            _ => LineCap::Round,
        }
    }

    fn from_pen_number(pen_number: u32) -> Result<Self, PenError> {
        let kind = match pen_number {
            0 | 12 => PenKind::Brush,
            21 => PenKind::Calligraphy,
            3 | 16 => PenKind::Marker,
            2 | 15 => PenKind::Ballpoint { alternate: false },
            4 | 17 => PenKind::Fineliner,
            1 | 14 => PenKind::Pencil,
            7 | 13 => PenKind::MechanicalPencil,
            5 | 18 => PenKind::Highlighter,
            8 => PenKind::EraseArea,
            6 => PenKind::Eraser,
            _ => return Err(PenError::UnknownPen { pen_number }),
        };
        Ok(kind)
    }
}

/// A pen instance as configured by one stroke
#[derive(Clone, Debug, PartialEq)]
pub struct Pen {
    kind: PenKind,
    pub base_width: f32,
    pub base_color: Rgb<u8>,
    pub base_opacity: f32,
    /// Number of samples sharing one derived segment appearance
    pub segment_length: u32,
}

impl Pen {
    /// Construct a pen from the tablet's `(pen_number, color_id, width)` triple.
    ///
    /// An unknown pen number or color id is a hard error; it is never mapped
    /// to a default pen.
    pub fn from_tag(pen_number: u32, color_id: u32, width: f32) -> Result<Self, PenError> {
        let kind = PenKind::from_pen_number(pen_number)?;

        let color_id = if kind == PenKind::Eraser {
            WHITE_COLOR_ID
        } else {
            color_id
        };
        let base_color = palette_color(color_id)?;

        let (base_width, base_opacity, segment_length) = match kind {
            PenKind::Fineliner => (width * MAGIC_PENCIL_SIZE, 1.0, DEFAULT_SEGMENT_LENGTH),
            PenKind::Ballpoint { .. } => (width, 1.0, 5),
            PenKind::Marker => (width, 1.0, 3),
            PenKind::Pencil | PenKind::Brush | PenKind::Calligraphy => (width, 1.0, 2),
            PenKind::MechanicalPencil => (width * MAGIC_PENCIL_SIZE * 1.01, 0.85, 2),
            PenKind::Highlighter => (HIGHLIGHTER_WIDTH * 10.0, 0.25, DEFAULT_SEGMENT_LENGTH),
            PenKind::Eraser => (width * 2.0, 1.0, DEFAULT_SEGMENT_LENGTH),
            PenKind::EraseArea => (width, 0.0, DEFAULT_SEGMENT_LENGTH),
        };

        Ok(Self {
            kind,
            base_width,
            base_color,
            base_opacity,
            segment_length,
        })
    }

    #[must_use]
    pub fn kind(&self) -> PenKind {
        self.kind
    }

    #[must_use]
    pub fn line_cap(&self) -> LineCap {
        self.kind.line_cap()
    }

    /// Ballpoint density pass of the next segment; always `false` for other kinds
    #[must_use]
    pub fn alternate(&self) -> bool {
        matches!(self.kind, PenKind::Ballpoint { alternate: true })
    }

    /// Derive width, color and opacity of the next segment.
    ///
    /// Takes `&mut self` because the Ballpoint flips its density pass on
    /// every call; reuse one `Pen` per stroke so the sequence stays intact.
    pub fn derive_segment(&mut self, sample: &StrokeSample, last_width: f32) -> Segment {
        let width = self.segment_width(sample, last_width);
        let Rgb([r, g, b]) = self.segment_color(sample);
        let opacity = cutoff(self.segment_opacity(sample));

        Segment {
            width: width.max(self.kind.min_width()),
            color: Rgba([r, g, b, 255]),
            opacity,
        }
    }

    fn segment_width(&self, s: &StrokeSample, last_width: f32) -> f32 {
        let tilt = direction_to_tilt(s.direction);
        match self.kind {
            PenKind::Ballpoint { alternate } => {
                let mut width =
                    (0.5 + s.pressure / 100.0) + (s.width / 4.0) - 0.5 * ((s.speed / 4.0) / 50.0);
                width *= 2.0;
                let density = if alternate {
                    ballpoint_intensity(s)
                } else {
                    1.0
                };
                width * density * 2.3
            }
            PenKind::Marker => 3.36 * ((s.width / 4.0) - 0.4 * tilt) + 0.1 * last_width,
            PenKind::Pencil => {
                let width = 10.0
                    * ((((0.8 * self.base_width) + (0.5 * s.pressure / 255.0)) * (s.width / 3.0))
                        - (0.25 * tilt.abs().powf(2.1))
                        - (0.6 * (s.speed / 4.0) / 10.0));
                let max_width = self.base_width * MAGIC_PENCIL_SIZE;
                let width = if width < max_width { width } else { max_width };
                width.max(3.0)
            }
            PenKind::MechanicalPencil => self.base_width.max(5.0),
            PenKind::Brush => {
                1.68 * (((1.0 + 1.4 * s.pressure / 255.0) * (s.width / 4.0))
                    - (0.5 * tilt)
                    - ((s.speed / 4.0) / 50.0))
            }
            PenKind::Calligraphy => {
                2.16 * (((1.0 + s.pressure / 255.0) * (s.width / 4.0)) - 0.3 * tilt)
                    + 0.1 * last_width
            }
            PenKind::Fineliner
            | PenKind::Highlighter
            | PenKind::Eraser
            | PenKind::EraseArea => self.base_width,
        }
    }

    fn segment_color(&self, s: &StrokeSample) -> Rgb<u8> {
        match self.kind {
            PenKind::Brush => {
                // Brush shades through color, not opacity: overlapping dots would stack alpha.
                let intensity =
                    cutoff(((s.pressure / 255.0).powf(1.5) - 0.2 * ((s.speed / 4.0) / 50.0)) * 1.5);
                let Rgb(base) = self.base_color;
                Rgb(base.map(|c| (intensity * f32::from(c)) as u8))
            }
            _ => self.base_color,
        }
    }

    fn segment_opacity(&mut self, s: &StrokeSample) -> f32 {
        match &mut self.kind {
            PenKind::Ballpoint { alternate } => {
                let opacity = if *alternate {
                    1.0
                } else {
                    ballpoint_intensity(s)
                };
                *alternate = !*alternate;
                opacity
            }
            PenKind::Pencil => {
                let opacity = (0.1 * -((s.speed / 4.0) / 35.0)) + (s.pressure / 255.0);
                cutoff(opacity) - 0.1
            }
            PenKind::MechanicalPencil => {
                if s.direction / 255.0 < 0.5 {
                    cutoff(s.speed / 50.0 * s.pressure / 255.0).max(0.3)
                } else {
                    self.base_opacity
                }
            }
            _ => self.base_opacity,
        }
    }
}

fn ballpoint_intensity(s: &StrokeSample) -> f32 {
    cutoff((0.1 * -((s.speed / 4.0) / 35.0)) + (1.2 * s.pressure / 255.0) + 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PEN_NUMBERS: [u32; 17] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 13, 14, 15, 16, 17, 18, 21];

    fn sample(speed: f32, direction: f32, width: f32, pressure: f32) -> StrokeSample {
        StrokeSample {
            speed,
            direction,
            width,
            pressure,
        }
    }

    #[test]
    fn tilt_covers_full_circle() {
        assert_eq!(direction_to_tilt(0.0), 0.0);
        assert!((direction_to_tilt(255.0) - 2.0 * PI).abs() < 1e-5);
    }

    #[test]
    fn cutoff_clamps_and_rejects_nan() {
        assert_eq!(cutoff(1.7), 1.0);
        assert_eq!(cutoff(-0.2), 0.0);
        assert_eq!(cutoff(0.4), 0.4);
        assert_eq!(cutoff(f32::NAN), 0.0);
    }

    #[test]
    fn pen_numbers_map_to_kinds() {
        let kind = |n| Pen::from_tag(n, 0, 2.0).unwrap().kind();
        assert_eq!(kind(0), PenKind::Brush);
        assert_eq!(kind(12), PenKind::Brush);
        assert_eq!(kind(21), PenKind::Calligraphy);
        assert_eq!(kind(16), PenKind::Marker);
        assert_eq!(kind(15), PenKind::Ballpoint { alternate: false });
        assert_eq!(kind(17), PenKind::Fineliner);
        assert_eq!(kind(14), PenKind::Pencil);
        assert_eq!(kind(13), PenKind::MechanicalPencil);
        assert_eq!(kind(18), PenKind::Highlighter);
        assert_eq!(kind(8), PenKind::EraseArea);
        assert_eq!(kind(6), PenKind::Eraser);
    }

    #[test]
    fn unknown_pen_number_is_an_error() {
        assert_eq!(
            Pen::from_tag(9, 0, 2.0),
            Err(PenError::UnknownPen { pen_number: 9 })
        );
        assert_eq!(
            Pen::from_tag(99, 0, 2.0),
            Err(PenError::UnknownPen { pen_number: 99 })
        );
    }

    #[test]
    fn unknown_color_is_an_error_except_for_eraser() {
        assert_eq!(
            Pen::from_tag(2, 42, 2.0),
            Err(PenError::UnknownColor { color_id: 42 })
        );
        let eraser = Pen::from_tag(6, 42, 2.0).unwrap();
        assert_eq!(eraser.base_color, Rgb([255, 255, 255]));
        assert_eq!(eraser.base_width, 4.0);
    }

    #[test]
    fn pencil_full_pressure_opacity() {
        let mut pencil = Pen::from_tag(1, 0, 2.0).unwrap();
        let segment = pencil.derive_segment(&sample(0.0, 0.0, 3.0, 255.0), 0.0);
        assert!((segment.opacity - 0.9).abs() < 1e-6, "{}", segment.opacity);
    }

    #[test]
    fn ballpoint_alternates_every_segment() {
        let mut ballpoint = Pen::from_tag(2, 0, 2.0).unwrap();
        let s = sample(20.0, 10.0, 8.0, 128.0);
        let mut passes = Vec::new();
        for _ in 0..6 {
            passes.push(ballpoint.alternate());
            ballpoint.derive_segment(&s, 0.0);
        }
        assert_eq!(passes, vec![false, true, false, true, false, true]);
    }

    #[test]
    fn ballpoint_second_pass_is_opaque_and_narrower() {
        let mut ballpoint = Pen::from_tag(2, 0, 2.0).unwrap();
        let s = sample(40.0, 0.0, 8.0, 60.0);
        let first = ballpoint.derive_segment(&s, 0.0);
        let second = ballpoint.derive_segment(&s, first.width);
        assert_eq!(second.opacity, 1.0);
        assert!(first.opacity < 1.0);
        assert!(second.width < first.width);
    }

    #[test]
    fn fixed_opacity_pens() {
        let s = sample(10.0, 30.0, 8.0, 200.0);

        let mut highlighter = Pen::from_tag(5, 3, 7.0).unwrap();
        let segment = highlighter.derive_segment(&s, 0.0);
        assert_eq!(segment.opacity, 0.25);
        assert_eq!(segment.width, 150.0);
        assert_eq!(highlighter.line_cap(), LineCap::Square);

        let mut eraser = Pen::from_tag(6, 0, 3.0).unwrap();
        let segment = eraser.derive_segment(&s, 0.0);
        assert_eq!(segment.opacity, 1.0);
        assert_eq!(segment.width, 6.0);
        assert_eq!(eraser.line_cap(), LineCap::Square);

        let mut erase_area = Pen::from_tag(8, 0, 3.0).unwrap();
        assert_eq!(erase_area.derive_segment(&s, 0.0).opacity, 0.0);
        assert_eq!(erase_area.line_cap(), LineCap::Square);
    }

    #[test]
    fn brush_darkens_with_pressure() {
        let mut brush = Pen::from_tag(0, 6, 2.0).unwrap();
        let light = brush.derive_segment(&sample(0.0, 0.0, 8.0, 40.0), 0.0);
        let heavy = brush.derive_segment(&sample(0.0, 0.0, 8.0, 255.0), 0.0);
        assert_eq!(heavy.color, Rgba([0, 98, 204, 255]));
        assert!(light.color.0[2] < heavy.color.0[2]);
        assert_eq!(heavy.opacity, 1.0);
    }

    #[test]
    fn marker_and_calligraphy_carry_previous_width() {
        let s = sample(0.0, 0.0, 8.0, 128.0);
        let mut marker = Pen::from_tag(3, 0, 2.0).unwrap();
        let without = marker.derive_segment(&s, 0.0).width;
        let with = marker.derive_segment(&s, 10.0).width;
        assert!((with - without - 1.0).abs() < 1e-5);

        let mut calligraphy = Pen::from_tag(21, 0, 2.0).unwrap();
        let without = calligraphy.derive_segment(&s, 0.0).width;
        let with = calligraphy.derive_segment(&s, 10.0).width;
        assert!((with - without - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mechanical_pencil_opacity_depends_on_direction() {
        let mut pencil = Pen::from_tag(7, 0, 0.01).unwrap();
        let forward = pencil.derive_segment(&sample(0.0, 10.0, 8.0, 255.0), 0.0);
        assert_eq!(forward.opacity, 0.3);
        let backward = pencil.derive_segment(&sample(0.0, 200.0, 8.0, 255.0), 0.0);
        assert_eq!(backward.opacity, 0.85);
        assert_eq!(forward.width, 5.0);
    }

    #[test]
    fn outputs_stay_within_documented_ranges() {
        let speeds = [0.0, 5.0, 80.0, 400.0, 5000.0];
        let directions = [0.0, 64.0, 127.0, 200.0, 255.0];
        let widths = [0.0, 2.0, 8.0, 40.0];
        let pressures = [0.0, 30.0, 128.0, 255.0];
        let base_widths = [0.0, 1.0, 2.0, 3.5];

        for &pen_number in &ALL_PEN_NUMBERS {
            for &base_width in &base_widths {
                let mut pen = Pen::from_tag(pen_number, 0, base_width).unwrap();
                let floor = pen.kind().min_width();
                let mut last_width = 0.0;
                for &speed in &speeds {
                    for &direction in &directions {
                        for &width in &widths {
                            for &pressure in &pressures {
                                let s = sample(speed, direction, width, pressure);
                                let segment = pen.derive_segment(&s, last_width);
                                assert!(
                                    (0.0..=1.0).contains(&segment.opacity),
                                    "{} opacity {} out of range",
                                    pen.kind().name(),
                                    segment.opacity
                                );
                                assert!(
                                    segment.width >= floor,
                                    "{} width {} below floor {}",
                                    pen.kind().name(),
                                    segment.width,
                                    floor
                                );
                                last_width = segment.width;
                            }
                        }
                    }
                }
            }
        }
    }
}
