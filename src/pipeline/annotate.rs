//! Box and label overlay drawn in place on captured frames

use std::collections::HashMap;
use std::time::Duration;

use crate::capture::Frame;
use crate::detect::{DetectionBatch, DetectionBox};
use crate::{ClassLabel, OverlayConfig};

/// Glyph cell: 5x7 pixels plus one column of spacing
const GLYPH_ADVANCE: i64 = 6;
/// Distance from the label's top row to the top edge of its box
const LABEL_OFFSET: i64 = 10;

/// Rendering style of a box, chosen by its age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxStyle {
    Active,
    Muted,
}

/// True while a detection stamped at `timestamp` is younger than `window`.
/// An age exactly equal to the window is stale.
pub fn classify_fresh(now: f64, timestamp: f64, window: Duration) -> bool {
    now - timestamp < window.as_secs_f64()
}

pub fn box_style(now: f64, timestamp: f64, window: Duration) -> BoxStyle {
    if classify_fresh(now, timestamp, window) {
        BoxStyle::Active
    } else {
        BoxStyle::Muted
    }
}

/// Draws detection batches onto frames
#[derive(Debug, Clone)]
pub struct Annotator {
    window: Duration,
    active: [u8; 3],
    muted: [u8; 3],
    thickness: u32,
    names: HashMap<u32, String>,
}

impl Annotator {
    pub fn new(config: &OverlayConfig, classes: &[ClassLabel]) -> Self {
        Self {
            window: config.freshness_window(),
            active: config.active_color,
            muted: config.muted_color,
            thickness: config.thickness.max(1),
            names: classes
                .iter()
                .map(|class| (class.id, class.name.clone()))
                .collect(),
        }
    }

    /// Label text for a box, e.g. `person: 0.90`. Unknown classes show their id.
    pub fn label(&self, det: &DetectionBox) -> String {
        match self.names.get(&det.class_id) {
            Some(name) => format!("{}: {:.2}", name, det.confidence),
            None => format!("{}: {:.2}", det.class_id, det.confidence),
        }
    }

    pub fn color(&self, style: BoxStyle) -> [u8; 3] {
        match style {
            BoxStyle::Active => self.active,
            BoxStyle::Muted => self.muted,
        }
    }

    /// Draw every box of `batch`. Stale boxes are demoted to the muted style,
    /// never skipped. Returns the style used for each box, in batch order.
    pub fn annotate(&self, frame: &mut Frame, batch: &DetectionBatch, now: f64) -> Vec<BoxStyle> {
        batch
            .iter()
            .map(|det| {
                let style = box_style(now, det.timestamp, self.window);
                self.draw_box(frame, det, self.color(style));
                style
            })
            .collect()
    }

    fn draw_box(&self, frame: &mut Frame, det: &DetectionBox, color: [u8; 3]) {
        let (x1, x2) = order(det.x1 as i64, det.x2 as i64);
        let (y1, y2) = order(det.y1 as i64, det.y2 as i64);
        // Only walk the part of each edge that can land inside the raster
        let (w, h) = (frame.width() as i64, frame.height() as i64);
        let (span_x1, span_x2) = (x1.max(0), x2.min(w - 1));
        let (span_y1, span_y2) = (y1.max(0), y2.min(h - 1));
        for t in 0..self.thickness as i64 {
            for x in span_x1..=span_x2 {
                frame.put_pixel(x, y1 + t, color);
                frame.put_pixel(x, y2 - t, color);
            }
            for y in span_y1..=span_y2 {
                frame.put_pixel(x1 + t, y, color);
                frame.put_pixel(x2 - t, y, color);
            }
        }

        let label = self.label(det);
        let label_y = (y1 - LABEL_OFFSET).max(0);
        draw_label(frame, x1, label_y, &label, color);
    }
}

fn order(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn draw_label(frame: &mut Frame, mut x: i64, y: i64, text: &str, color: [u8; 3]) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        frame.put_pixel(x + col, y + row as i64, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'J' => Some([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'Q' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010]),
        'X' => Some([0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001]),
        'Y' => Some([0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100]),
        'Z' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        '_' => Some([0, 0, 0, 0, 0, 0, 0b11111]),
        ' ' => Some([0; 7]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameShape;

    const WINDOW: Duration = Duration::from_millis(300);

    fn detection(timestamp: f64) -> DetectionBox {
        DetectionBox {
            x1: 20,
            y1: 20,
            x2: 40,
            y2: 35,
            confidence: 0.9,
            class_id: 0,
            timestamp,
        }
    }

    #[test]
    fn freshness_boundary_is_stale() {
        assert!(classify_fresh(10.0, 10.0, WINDOW));
        assert!(classify_fresh(10.299, 10.0, WINDOW));
        // 0.25 is exact in binary, so this is precisely the boundary
        let quarter = Duration::from_millis(250);
        assert!(!classify_fresh(10.25, 10.0, quarter));
        assert!(!classify_fresh(11.0, 10.0, WINDOW));
    }

    #[test]
    fn fresh_and_stale_boxes_use_their_colors() {
        let annotator = Annotator::new(&OverlayConfig::default(), &[]);
        let mut frame = Frame::zeroed(FrameShape::new(60, 80, 3));
        let batch = DetectionBatch {
            boxes: vec![detection(100.0)],
            frame_sequence: 1,
        };

        let styles = annotator.annotate(&mut frame, &batch, 100.1);
        assert_eq!(styles, vec![BoxStyle::Active]);
        assert_eq!(frame.pixel(20, 20), Some(&[0, 255, 0][..]));
        assert_eq!(frame.pixel(40, 35), Some(&[0, 255, 0][..]));

        let styles = annotator.annotate(&mut frame, &batch, 101.0);
        assert_eq!(styles, vec![BoxStyle::Muted]);
        assert_eq!(frame.pixel(20, 20), Some(&[128, 128, 128][..]));
    }

    #[test]
    fn box_is_hollow_with_configured_thickness() {
        let annotator = Annotator::new(&OverlayConfig::default(), &[]);
        let mut frame = Frame::zeroed(FrameShape::new(60, 80, 3));
        let batch = DetectionBatch {
            boxes: vec![detection(0.0)],
            frame_sequence: 1,
        };
        annotator.annotate(&mut frame, &batch, 0.0);
        assert_eq!(frame.pixel(21, 30), Some(&[0, 255, 0][..]));
        assert_eq!(frame.pixel(22, 30), Some(&[0, 0, 0][..]));
        assert_eq!(frame.pixel(30, 28), Some(&[0, 0, 0][..]));
    }

    #[test]
    fn out_of_frame_boxes_are_clipped() {
        let annotator = Annotator::new(&OverlayConfig::default(), &[]);
        let mut frame = Frame::zeroed(FrameShape::new(10, 10, 3));
        let batch = DetectionBatch {
            boxes: vec![DetectionBox {
                x1: -50,
                y1: -50,
                x2: 500,
                y2: 500,
                ..detection(0.0)
            }],
            frame_sequence: 1,
        };
        annotator.annotate(&mut frame, &batch, 0.0);
        assert_eq!(frame.data.len(), 300);
    }

    #[test]
    fn label_shows_class_name_and_confidence() {
        let classes = [ClassLabel {
            id: 0,
            name: "person".into(),
        }];
        let annotator = Annotator::new(&OverlayConfig::default(), &classes);
        assert_eq!(annotator.label(&detection(0.0)), "person: 0.90");

        let unknown = DetectionBox {
            class_id: 7,
            confidence: 0.5,
            ..detection(0.0)
        };
        assert_eq!(annotator.label(&unknown), "7: 0.50");
    }

    #[test]
    fn label_is_drawn_above_the_box_in_capitals() {
        let classes = [ClassLabel {
            id: 0,
            name: "person".into(),
        }];
        let annotator = Annotator::new(&OverlayConfig::default(), &classes);
        let mut frame = Frame::zeroed(FrameShape::new(60, 120, 3));
        let batch = DetectionBatch {
            boxes: vec![detection(0.0)],
            frame_sequence: 1,
        };
        annotator.annotate(&mut frame, &batch, 0.0);

        // Label top row sits LABEL_OFFSET above y1 = 20. 'P' has a full
        // left column, '0' does not.
        assert_eq!(frame.pixel(20, 10), Some(&[0, 255, 0][..]));
        assert_eq!(frame.pixel(20, 13), Some(&[0, 255, 0][..]));
        // 'E' spans its whole top row in the second cell
        for col in 26..31 {
            assert_eq!(frame.pixel(col, 10), Some(&[0, 255, 0][..]));
        }
        // The space after ':' is blank
        for row in 10..17 {
            assert_eq!(frame.pixel(20 + 7 * GLYPH_ADVANCE as u32, row), Some(&[0, 0, 0][..]));
        }
    }

    #[test]
    fn every_letter_has_a_glyph() {
        for ch in ('A'..='Z').chain('0'..='9') {
            assert!(glyph_bits(ch).is_some(), "missing glyph for {ch}");
        }
    }

    #[test]
    fn empty_batch_leaves_frame_untouched() {
        let annotator = Annotator::new(&OverlayConfig::default(), &[]);
        let mut frame = Frame::filled(FrameShape::new(10, 10, 3), [3, 4, 5]);
        let before = frame.clone();
        assert!(annotator
            .annotate(&mut frame, &DetectionBatch::default(), 0.0)
            .is_empty());
        assert_eq!(frame, before);
    }
}
