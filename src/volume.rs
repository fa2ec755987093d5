//! Typed N-dimensional volumes as loaded from disk.

use ndarray::{ArrayD, IxDyn};
use zarrs::array::{DataType, ElementOwned, FillValue, data_type};

/// A numeric element type that can be stored in a zarr array.
pub trait Voxel: ElementOwned + Copy + Default + PartialOrd + Send + Sync + 'static {
    /// Zarr V3 data type name.
    const NAME: &'static str;

    fn data_type() -> DataType;

    fn fill_value() -> FillValue;

    fn to_f64(self) -> f64;

    /// Saturating cast; fractional parts are truncated for integer types.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_voxel {
    ($ty:ty, $name:literal, $dt:path) => {
        impl Voxel for $ty {
            const NAME: &'static str = $name;

            fn data_type() -> DataType {
                $dt()
            }

            fn fill_value() -> FillValue {
                FillValue::from(<$ty>::default())
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_voxel!(u8, "uint8", data_type::uint8);
impl_voxel!(u16, "uint16", data_type::uint16);
impl_voxel!(u32, "uint32", data_type::uint32);
impl_voxel!(i32, "int32", data_type::int32);
impl_voxel!(f32, "float32", data_type::float32);
impl_voxel!(f64, "float64", data_type::float64);

/// A volume of any supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeData {
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    Int32(ArrayD<i32>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

/// Apply a generic expression to the array inside a [VolumeData],
/// re-wrapping the result in the same variant.
#[macro_export]
macro_rules! map_volume {
    ($volume:expr, $arr:ident => $body:expr) => {
        match $volume {
            $crate::volume::VolumeData::UInt8($arr) => $crate::volume::VolumeData::UInt8($body),
            $crate::volume::VolumeData::UInt16($arr) => $crate::volume::VolumeData::UInt16($body),
            $crate::volume::VolumeData::UInt32($arr) => $crate::volume::VolumeData::UInt32($body),
            $crate::volume::VolumeData::Int32($arr) => $crate::volume::VolumeData::Int32($body),
            $crate::volume::VolumeData::Float32($arr) => $crate::volume::VolumeData::Float32($body),
            $crate::volume::VolumeData::Float64($arr) => $crate::volume::VolumeData::Float64($body),
        }
    };
}

/// Apply a generic expression to the array inside a [VolumeData].
#[macro_export]
macro_rules! with_volume {
    ($volume:expr, $arr:ident => $body:expr) => {
        match $volume {
            $crate::volume::VolumeData::UInt8($arr) => $body,
            $crate::volume::VolumeData::UInt16($arr) => $body,
            $crate::volume::VolumeData::UInt32($arr) => $body,
            $crate::volume::VolumeData::Int32($arr) => $body,
            $crate::volume::VolumeData::Float32($arr) => $body,
            $crate::volume::VolumeData::Float64($arr) => $body,
        }
    };
}

impl VolumeData {
    pub fn shape(&self) -> &[usize] {
        with_volume!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Zarr V3 data type name of the elements.
    pub fn dtype_name(&self) -> &'static str {
        fn name<T: Voxel>(_: &ArrayD<T>) -> &'static str {
            T::NAME
        }
        with_volume!(self, a => name(a))
    }

    /// Build a volume from a flat, C-ordered buffer.
    pub fn from_shape_vec<T: Voxel>(shape: &[usize], data: Vec<T>) -> crate::Result<ArrayD<T>> {
        Ok(ArrayD::from_shape_vec(IxDyn(shape), data)?)
    }

    /// Copy all elements to `f32`, the working type of the prediction pipeline.
    pub fn to_f32(&self) -> ArrayD<f32> {
        with_volume!(self, a => a.mapv(|v| v.to_f64() as f32))
    }
}

macro_rules! impl_from_array {
    ($ty:ty, $variant:ident) => {
        impl From<ArrayD<$ty>> for VolumeData {
            fn from(value: ArrayD<$ty>) -> Self {
                Self::$variant(value)
            }
        }
    };
}

impl_from_array!(u8, UInt8);
impl_from_array!(u16, UInt16);
impl_from_array!(u32, UInt32);
impl_from_array!(i32, Int32);
impl_from_array!(f32, Float32);
impl_from_array!(f64, Float64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_follows_variant() {
        let v: VolumeData = ArrayD::<u16>::zeros(IxDyn(&[2, 3])).into();
        assert_eq!(v.dtype_name(), "uint16");
        assert_eq!(v.shape(), &[2, 3]);
    }

    #[test]
    fn map_keeps_variant() {
        let v: VolumeData = ArrayD::<u8>::from_elem(IxDyn(&[2, 2]), 3).into();
        let doubled = map_volume!(v, a => a.mapv(|x| x + x));
        assert_eq!(
            doubled,
            VolumeData::UInt8(ArrayD::from_elem(IxDyn(&[2, 2]), 6))
        );
    }

    #[test]
    fn float_cast_saturates() {
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u16::from_f64(-4.0), 0);
        assert_eq!(u32::from_f64(2.9), 2);
    }
}
