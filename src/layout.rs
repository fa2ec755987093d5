//! Axis layouts and normalization into the canonical image/label layouts.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// Axis identity within a layout string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisName {
    C,
    Z,
    Y,
    X,
}

impl AxisName {
    pub fn as_char(self) -> char {
        match self {
            AxisName::C => 'c',
            AxisName::Z => 'z',
            AxisName::Y => 'y',
            AxisName::X => 'x',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AxisName::C => "c",
            AxisName::Z => "z",
            AxisName::Y => "y",
            AxisName::X => "x",
        }
    }

    pub fn is_spatial(self) -> bool {
        !matches!(self, AxisName::C)
    }

    /// Index into a (Z, Y, X) voxel size.
    pub fn spatial_index(self) -> Option<usize> {
        match self {
            AxisName::C => None,
            AxisName::Z => Some(0),
            AxisName::Y => Some(1),
            AxisName::X => Some(2),
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(AxisName::C),
            'Z' => Some(AxisName::Z),
            'Y' => Some(AxisName::Y),
            'X' => Some(AxisName::X),
            _ => None,
        }
    }
}

/// An ordered set of distinct axes, e.g. `ZCYX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisLayout(Vec<AxisName>);

impl AxisLayout {
    pub fn image() -> Self {
        Self(vec![AxisName::C, AxisName::Z, AxisName::Y, AxisName::X])
    }

    pub fn label() -> Self {
        Self(vec![AxisName::Z, AxisName::Y, AxisName::X])
    }

    pub fn axes(&self) -> &[AxisName] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, axis: AxisName) -> bool {
        self.0.contains(&axis)
    }

    pub fn position(&self, axis: AxisName) -> Option<usize> {
        self.0.iter().position(|a| *a == axis)
    }

    /// The same layout with the channel axis removed.
    pub fn without_channel(&self) -> Self {
        Self(self.0.iter().copied().filter(|a| a.is_spatial()).collect())
    }

    /// Whether the layout describes a volume with a Z axis.
    pub fn is_3d(&self) -> bool {
        self.contains(AxisName::Z)
    }
}

impl FromStr for AxisLayout {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = |reason: String| crate::Error::UnsupportedLayout {
            layout: s.to_string(),
            reason,
        };
        let mut axes = Vec::with_capacity(s.len());
        for c in s.chars() {
            let axis = AxisName::from_char(c).ok_or_else(|| unsupported(format!("unknown axis {c:?}")))?;
            if axes.contains(&axis) {
                return Err(unsupported(format!("duplicate axis {c:?}")));
            }
            axes.push(axis);
        }
        if !(axes.contains(&AxisName::Y) && axes.contains(&AxisName::X)) {
            return Err(unsupported("Y and X axes are required".into()));
        }
        Ok(Self(axes))
    }
}

impl fmt::Display for AxisLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.0 {
            write!(f, "{}", a.as_char().to_ascii_uppercase())?;
        }
        Ok(())
    }
}

impl Serialize for AxisLayout {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AxisLayout {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reorder `array` from `source` into `target`, inserting singleton axes for
/// target axes absent from the source.
///
/// Returns the normalized array and one physical scale per target axis:
/// `1.0` for the channel axis, the matching `voxel_size` (Z, Y, X) component
/// for spatial axes.
pub fn normalize<T: Clone>(
    array: ArrayD<T>,
    source: &AxisLayout,
    voxel_size: [f64; 3],
    target: &AxisLayout,
) -> crate::Result<(ArrayD<T>, Vec<f64>)> {
    if source.len() != array.ndim() {
        return Err(crate::Error::ShapeMismatch {
            layout: source.to_string(),
            left: array.shape().to_vec(),
            right: crate::ExpectedShape::Rank(source.len()),
        });
    }
    if let Some(extra) = source.axes().iter().find(|a| !target.contains(**a)) {
        return Err(crate::Error::UnsupportedLayout {
            layout: source.to_string(),
            reason: format!(
                "axis {:?} has no place in target layout {target}",
                extra.as_char()
            ),
        });
    }

    // source axis indices ordered by their target position
    let mut order: Vec<usize> = (0..source.len()).collect();
    order.sort_by_key(|&i| target.position(source.axes()[i]));
    let mut out = array.permuted_axes(IxDyn(&order));

    for (i, axis) in target.axes().iter().enumerate() {
        if !source.contains(*axis) {
            out = out.insert_axis(Axis(i));
        }
    }

    let scale = target
        .axes()
        .iter()
        .map(|a| a.spatial_index().map_or(1.0, |i| voxel_size[i]))
        .collect();

    Ok((out.as_standard_layout().into_owned(), scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp(shape: &[usize]) -> ArrayD<u32> {
        let n = shape.iter().product::<usize>() as u32;
        Array::from_iter(0..n).into_shape_with_order(IxDyn(shape)).unwrap()
    }

    #[test]
    fn parse_layouts() {
        assert_eq!("zcyx".parse::<AxisLayout>().unwrap().to_string(), "ZCYX");
        assert!("ZZYX".parse::<AxisLayout>().is_err());
        assert!("TZYX".parse::<AxisLayout>().is_err());
        assert!("CZ".parse::<AxisLayout>().is_err());
    }

    #[test]
    fn zyx_gains_channel() {
        let (out, scale) = normalize(
            ramp(&[2, 3, 4]),
            &"ZYX".parse().unwrap(),
            [0.5, 0.25, 0.25],
            &AxisLayout::image(),
        )
        .unwrap();
        assert_eq!(out.shape(), &[1, 2, 3, 4]);
        assert_eq!(scale, vec![1.0, 0.5, 0.25, 0.25]);
        assert_eq!(out[[0, 1, 2, 3]], 23);
    }

    #[test]
    fn zcyx_moves_channel_first() {
        let src = ramp(&[2, 3, 4, 5]);
        let (out, _) = normalize(
            src.clone(),
            &"ZCYX".parse().unwrap(),
            [1.0, 1.0, 1.0],
            &AxisLayout::image(),
        )
        .unwrap();
        assert_eq!(out.shape(), &[3, 2, 4, 5]);
        assert_eq!(out[[2, 1, 3, 4]], src[[1, 2, 3, 4]]);
    }

    #[test]
    fn yx_label_gains_z() {
        let (out, scale) = normalize(
            ramp(&[3, 4]),
            &"YX".parse().unwrap(),
            [1.0, 0.5, 0.5],
            &AxisLayout::label(),
        )
        .unwrap();
        assert_eq!(out.shape(), &[1, 3, 4]);
        assert_eq!(scale, vec![1.0, 0.5, 0.5]);
    }

    #[test]
    fn rank_mismatch_is_rejected() {
        let err = normalize(
            ramp(&[2, 3]),
            &"ZYX".parse().unwrap(),
            [1.0; 3],
            &AxisLayout::image(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "shape mismatch for layout ZYX: [2, 3] != 3 axes"
        );
        match err {
            crate::Error::ShapeMismatch { left, right, .. } => {
                assert_eq!(left, vec![2, 3]);
                assert_eq!(right, crate::ExpectedShape::Rank(3));
            }
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn channel_cannot_enter_label_layout() {
        let err = normalize(
            ramp(&[2, 3, 4]),
            &"CYX".parse().unwrap(),
            [1.0; 3],
            &AxisLayout::label(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedLayout { .. }));
    }
}
