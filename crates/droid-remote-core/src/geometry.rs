//! Device-pixel geometry.
//!
//! All coordinates are integer device pixels as reported by the UI-automation
//! dump (`bounds="[x1,y1][x2,y2]"`). Centers are used directly as tap targets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by geometric constructions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// A bounds constructor received a minimum greater than its maximum.
    #[error("{axis}_min ({min}) > {axis}_max ({max})")]
    InvertedBounds { axis: char, min: i32, max: i32 },

    /// The requested symbol does not exist on the pad layout.
    #[error("symbol '{0}' not found on the pinpad layout")]
    SymbolNotFound(char),
}

/// A tap target in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An axis-aligned rectangle with `x_min <= x_max` and `y_min <= y_max`.
///
/// Use [`Bounds::new`] when the ordering is already known (it is checked) and
/// [`Bounds::from_corners`] for two arbitrary corner points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BoundsRepr")]
pub struct Bounds {
    x_min: i32,
    y_min: i32,
    x_max: i32,
    y_max: i32,
}

/// Unchecked wire form, validated through [`Bounds::new`] on deserialization.
#[derive(Deserialize)]
struct BoundsRepr {
    x_min: i32,
    y_min: i32,
    x_max: i32,
    y_max: i32,
}

impl TryFrom<BoundsRepr> for Bounds {
    type Error = GeometryError;

    fn try_from(repr: BoundsRepr) -> Result<Self, Self::Error> {
        Bounds::new(repr.x_min, repr.y_min, repr.x_max, repr.y_max)
    }
}

impl Bounds {
    /// Create bounds from already-ordered edges.
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Result<Self, GeometryError> {
        if x_min > x_max {
            return Err(GeometryError::InvertedBounds {
                axis: 'x',
                min: x_min,
                max: x_max,
            });
        }
        if y_min > y_max {
            return Err(GeometryError::InvertedBounds {
                axis: 'y',
                min: y_min,
                max: y_max,
            });
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Create bounds from two arbitrary corners. Never fails.
    #[must_use]
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x_min: x1.min(x2),
            y_min: y1.min(y2),
            x_max: x1.max(x2),
            y_max: y1.max(y2),
        }
    }

    pub fn x_min(&self) -> i32 {
        self.x_min
    }

    pub fn y_min(&self) -> i32 {
        self.y_min
    }

    pub fn x_max(&self) -> i32 {
        self.x_max
    }

    pub fn y_max(&self) -> i32 {
        self.y_max
    }

    /// Widened, since edges at opposite ends of the `i32` range overflow it.
    pub fn width(&self) -> i64 {
        i64::from(self.x_max) - i64::from(self.x_min)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y_max) - i64::from(self.y_min)
    }

    /// Area in square pixels.
    pub fn surface_area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Integer midpoint, rounded towards negative infinity.
    pub fn center(&self) -> Point {
        Point {
            x: midpoint(self.x_min, self.x_max),
            y: midpoint(self.y_min, self.y_max),
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        (self.x_min..=self.x_max).contains(&point.x) && (self.y_min..=self.y_max).contains(&point.y)
    }
}

/// Floor of the mean, computed in `i64`. Always lies between `a` and `b`.
fn midpoint(a: i32, b: i32) -> i32 {
    let mid = (i64::from(a) + i64::from(b)).div_euclid(2);
    saturate(mid)
}

/// Clamp a widened coordinate back into device-pixel range.
pub(crate) fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.x_min, self.y_min, self.x_max, self.y_max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_normalizes_order() {
        let corner_sets = [
            (0, 0, 10, 20),
            (10, 20, 0, 0),
            (10, 0, 0, 20),
            (-5, 7, 3, -9),
            (4, 4, 4, 4),
        ];
        for (x1, y1, x2, y2) in corner_sets {
            let bounds = Bounds::from_corners(x1, y1, x2, y2);
            assert!(bounds.x_min() <= bounds.x_max());
            assert!(bounds.y_min() <= bounds.y_max());
            assert!(
                bounds.contains(bounds.center()),
                "center {} outside {}",
                bounds.center(),
                bounds
            );
        }
    }

    #[test]
    fn extreme_corners_keep_center_inside() {
        let extremes = [i32::MIN, i32::MIN + 1, -1, 0, 1, i32::MAX - 1, i32::MAX];
        for &x1 in &extremes {
            for &x2 in &extremes {
                for &y in &[i32::MIN, 0, i32::MAX] {
                    let bounds = Bounds::from_corners(x1, y, x2, 10);
                    let center = bounds.center();
                    assert!(bounds.contains(center), "center {} outside {}", center, bounds);
                    assert!(bounds.width() >= 0);
                    assert!(bounds.height() >= 0);
                }
            }
        }

        let full = Bounds::from_corners(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(full.width(), i64::from(u32::MAX));
        assert_eq!(full.center(), Point::new(-1, -1));
    }

    #[test]
    fn dump_bounds_near_the_limit_have_a_center() {
        let tree = crate::tree::UiTree::parse(
            r#"<hierarchy rotation="0"><node text="" bounds="[2147483000,0][2147483600,10]" /></hierarchy>"#,
        )
        .unwrap();
        let bounds = tree.nodes().next().unwrap().bounds().unwrap();
        assert_eq!(bounds.center(), Point::new(2147483300, 5));
    }

    #[test]
    fn new_rejects_inverted_x() {
        let err = Bounds::new(5, 0, 3, 10).unwrap_err();
        assert_eq!(
            err,
            GeometryError::InvertedBounds {
                axis: 'x',
                min: 5,
                max: 3
            }
        );
    }

    #[test]
    fn new_rejects_inverted_y() {
        assert!(matches!(
            Bounds::new(0, 9, 3, 1),
            Err(GeometryError::InvertedBounds { axis: 'y', .. })
        ));
    }

    #[test]
    fn derived_measures() {
        let bounds = Bounds::new(10, 20, 110, 70).unwrap();
        assert_eq!(bounds.width(), 100);
        assert_eq!(bounds.height(), 50);
        assert_eq!(bounds.surface_area(), 5000);
        assert_eq!(bounds.center(), Point::new(60, 45));
    }

    #[test]
    fn center_uses_floor_division() {
        let bounds = Bounds::new(0, 0, 5, 5).unwrap();
        assert_eq!(bounds.center(), Point::new(2, 2));

        let negative = Bounds::new(-5, -5, 0, 0).unwrap();
        assert_eq!(negative.center(), Point::new(-3, -3));
    }

    #[test]
    fn deserialization_checks_ordering() {
        let ok: Bounds =
            serde_json::from_str(r#"{"x_min":1,"y_min":2,"x_max":3,"y_max":4}"#).unwrap();
        assert_eq!(ok, Bounds::new(1, 2, 3, 4).unwrap());

        let bad = serde_json::from_str::<Bounds>(r#"{"x_min":5,"y_min":2,"x_max":3,"y_max":4}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn display_matches_dump_format() {
        let bounds = Bounds::new(0, 84, 1080, 2337).unwrap();
        assert_eq!(bounds.to_string(), "[0,84][1080,2337]");
    }
}
