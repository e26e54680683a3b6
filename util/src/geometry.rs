/// Axis-aligned box in CSS pixels, relative to the top-left of the viewport.
///
/// Negative `top` values are above the fold (scrolled past).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Returns the same box moved vertically by `dy` pixels.
    pub fn translated(self, dy: f64) -> Self {
        Self {
            top: self.top + dy,
            ..self
        }
    }
}

/// Visible area of the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when `rect` lies entirely beyond `margin` pixels above or below
    /// the visible area.
    pub fn is_outside(&self, rect: &Rect, margin: f64) -> bool {
        rect.bottom() < -margin || rect.top > self.height + margin
    }

    /// True when `rect` touches the band that extends `margin` pixels above
    /// and below the visible area.
    pub fn is_near(&self, rect: &Rect, margin: f64) -> bool {
        !self.is_outside(rect, margin)
    }

    /// Vertical distance from the visible area; zero when overlapping.
    pub fn distance(&self, rect: &Rect) -> f64 {
        if rect.top > self.height {
            rect.top - self.height
        } else if rect.bottom() < 0.0 {
            -rect.bottom()
        } else {
            0.0
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(390.0, 844.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_respects_margin_on_both_edges() {
        let viewport = Viewport::new(400.0, 800.0);
        let below = Rect::new(0.0, 1200.0, 100.0, 100.0);
        assert!(!viewport.is_outside(&below, 500.0));
        assert!(viewport.is_outside(&below, 350.0));

        let above = Rect::new(0.0, -600.0, 100.0, 100.0);
        assert!(viewport.is_outside(&above, 400.0));
        assert!(!viewport.is_outside(&above, 500.0));
    }

    #[test]
    fn distance_is_zero_when_overlapping() {
        let viewport = Viewport::new(400.0, 800.0);
        assert_eq!(viewport.distance(&Rect::new(0.0, 100.0, 10.0, 10.0)), 0.0);
        assert_eq!(viewport.distance(&Rect::new(0.0, 900.0, 10.0, 10.0)), 100.0);
        assert_eq!(viewport.distance(&Rect::new(0.0, -60.0, 10.0, 10.0)), 50.0);
    }
}
