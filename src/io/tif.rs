//! Multi-page grayscale TIFF stacks, with calibration taken from the
//! resolution tags and an ImageJ-style image description.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use ndarray::{ArrayD, Axis};
use tiff::ColorType;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{Rational, TiffEncoder, TiffValue, colortype};
use tiff::tags::{ResolutionUnit, Tag};

use super::LoadedVolume;
use crate::record::SpaceUnit;
use crate::volume::VolumeData;

/// Key/value lines of an ImageJ image description.
#[derive(Debug, Clone, Default, PartialEq)]
struct ImageJDescription {
    channels: usize,
    slices: usize,
    spacing: Option<f64>,
    unit: Option<String>,
}

impl ImageJDescription {
    fn parse(text: &str) -> Option<Self> {
        if !text.starts_with("ImageJ=") {
            return None;
        }
        let mut out = Self {
            channels: 1,
            slices: 1,
            ..Default::default()
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "channels" => out.channels = value.parse().unwrap_or(1),
                "slices" => out.slices = value.parse().unwrap_or(1),
                "spacing" => out.spacing = value.parse().ok(),
                // ImageJ escapes the micro sign
                "unit" => out.unit = Some(value.replace("\\u00B5", "µ")),
                _ => (),
            }
        }
        Some(out)
    }

    fn render(&self, pages: usize, spacing: f64, unit: SpaceUnit) -> String {
        let mut text = format!("ImageJ=1.11a\nimages={pages}\n");
        if self.channels > 1 {
            text.push_str(&format!("channels={}\n", self.channels));
        }
        if self.slices > 1 {
            text.push_str(&format!("slices={}\n", self.slices));
        }
        if self.channels > 1 && self.slices > 1 {
            text.push_str("hyperstack=true\n");
        }
        text.push_str(&format!("unit={unit}\nspacing={spacing}\n"));
        text
    }
}

/// Samples of all pages read so far, in one element type.
enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Samples {
    fn from_decoded(page: DecodingResult) -> crate::Result<Self> {
        Ok(match page {
            DecodingResult::U8(v) => Self::U8(v),
            DecodingResult::U16(v) => Self::U16(v),
            DecodingResult::U32(v) => Self::U32(v),
            DecodingResult::I32(v) => Self::I32(v),
            DecodingResult::F32(v) => Self::F32(v),
            DecodingResult::F64(v) => Self::F64(v),
            _ => return Err(crate::Error::invalid("unsupported TIFF sample format")),
        })
    }

    fn append(&mut self, page: DecodingResult) -> crate::Result<()> {
        match (self, page) {
            (Self::U8(a), DecodingResult::U8(b)) => a.extend(b),
            (Self::U16(a), DecodingResult::U16(b)) => a.extend(b),
            (Self::U32(a), DecodingResult::U32(b)) => a.extend(b),
            (Self::I32(a), DecodingResult::I32(b)) => a.extend(b),
            (Self::F32(a), DecodingResult::F32(b)) => a.extend(b),
            (Self::F64(a), DecodingResult::F64(b)) => a.extend(b),
            _ => return Err(crate::Error::invalid("TIFF pages differ in sample format")),
        }
        Ok(())
    }

    fn into_volume(self, shape: &[usize]) -> crate::Result<VolumeData> {
        Ok(match self {
            Self::U8(v) => VolumeData::from_shape_vec(shape, v)?.into(),
            Self::U16(v) => VolumeData::from_shape_vec(shape, v)?.into(),
            Self::U32(v) => VolumeData::from_shape_vec(shape, v)?.into(),
            Self::I32(v) => VolumeData::from_shape_vec(shape, v)?.into(),
            Self::F32(v) => VolumeData::from_shape_vec(shape, v)?.into(),
            Self::F64(v) => VolumeData::from_shape_vec(shape, v)?.into(),
        })
    }
}

/// Pixel size from a resolution tag, which holds pixels per unit.
fn pixel_size(value: Option<Value>) -> Option<f64> {
    let resolution = match value? {
        Value::Rational(n, d) if d > 0 => n as f64 / d as f64,
        Value::Float(v) => v as f64,
        Value::Double(v) => v,
        _ => return None,
    };
    (resolution > 0.0).then(|| 1.0 / resolution)
}

/// Read every page of a grayscale TIFF.
///
/// A single page gives a (Y, X) volume, several pages (Z, Y, X), and an
/// ImageJ hyperstack with both channels and slices (Z, C, Y, X).
pub fn read_tiff(path: &Path) -> crate::Result<LoadedVolume> {
    if !path.is_file() {
        return Err(crate::Error::InputNotFound(path.to_path_buf()));
    }
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?.with_limits(Limits::unlimited());

    if !matches!(decoder.colortype()?, ColorType::Gray(_)) {
        return Err(crate::Error::invalid(format!(
            "{} is not a grayscale TIFF",
            path.display()
        )));
    }
    let description = decoder
        .find_tag(Tag::ImageDescription)?
        .map(Value::into_string)
        .transpose()?
        .and_then(|d| ImageJDescription::parse(&d));
    let y = pixel_size(decoder.find_tag(Tag::YResolution)?);
    let x = pixel_size(decoder.find_tag(Tag::XResolution)?);
    let resolution_unit = decoder
        .find_tag(Tag::ResolutionUnit)?
        .and_then(|v| v.into_u32().ok());

    let (width, height) = decoder.dimensions()?;
    let mut samples = Samples::from_decoded(decoder.read_image()?)?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        if decoder.dimensions()? != (width, height) {
            return Err(crate::Error::invalid(format!(
                "pages of {} differ in size",
                path.display()
            )));
        }
        samples.append(decoder.read_image()?)?;
        pages += 1;
    }

    let (height, width) = (height as usize, width as usize);
    let shape = match &description {
        Some(d) if d.channels > 1 && d.slices > 1 && d.channels * d.slices == pages => {
            vec![d.slices, d.channels, height, width]
        }
        _ if pages > 1 => vec![pages, height, width],
        _ => vec![height, width],
    };
    let data = samples.into_volume(&shape)?;

    let unit = match description.as_ref().and_then(|d| d.unit.as_deref()) {
        Some(u) => u.parse().unwrap_or_else(|_| {
            log::warn!("unknown unit {u:?} in {}, assuming micrometer", path.display());
            SpaceUnit::default()
        }),
        None => match resolution_unit {
            Some(2) => SpaceUnit::Inch,
            Some(3) => SpaceUnit::Centimeter,
            _ => SpaceUnit::default(),
        },
    };
    let z = description.as_ref().and_then(|d| d.spacing).unwrap_or(1.0);
    let voxel_size = [z, y.unwrap_or(1.0), x.unwrap_or(1.0)];
    log::debug!(
        "read {} with shape {shape:?}, voxel size {voxel_size:?} {unit}",
        path.display()
    );
    Ok(LoadedVolume {
        data,
        voxel_size,
        unit,
    })
}

fn resolution(pixel_size: f64) -> Rational {
    Rational {
        n: 1_000_000,
        d: (pixel_size * 1_000_000.0).round().max(1.0) as u32,
    }
}

fn write_pages<W, C>(
    encoder: &mut TiffEncoder<W>,
    data: &ArrayD<C::Inner>,
    description: &str,
    voxel_size: [f64; 3],
) -> crate::Result<()>
where
    W: Write + Seek,
    C: colortype::ColorType,
    C::Inner: Copy,
    [C::Inner]: TiffValue,
{
    let shape = data.shape();
    let (height, width) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    let pages = data.len() / (height * width).max(1);
    let stack = data
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((pages, height, width))?;
    for (i, page) in stack.axis_iter(Axis(0)).enumerate() {
        let mut image = encoder.new_image::<C>(width as u32, height as u32)?;
        if i == 0 {
            image.encoder().write_tag(Tag::ImageDescription, description)?;
        }
        image.resolution_unit(ResolutionUnit::None);
        image.y_resolution(resolution(voxel_size[1]));
        image.x_resolution(resolution(voxel_size[2]));
        let samples: Vec<C::Inner> = page.iter().copied().collect();
        image.write_data(&samples)?;
    }
    Ok(())
}

/// Write a (Y, X), (Z, Y, X) or (Z, C, Y, X) volume as an ImageJ-style stack.
pub fn write_tiff(
    path: &Path,
    data: &VolumeData,
    voxel_size: [f64; 3],
    unit: SpaceUnit,
) -> crate::Result<()> {
    let shape = data.shape();
    let (slices, channels) = match shape.len() {
        2 => (1, 1),
        3 => (shape[0], 1),
        4 => (shape[0], shape[1]),
        n => {
            return Err(crate::Error::UnsupportedDimensionality(format!(
                "cannot write a {n}-D TIFF"
            )));
        }
    };
    let description = ImageJDescription {
        channels,
        slices,
        ..Default::default()
    }
    .render(slices * channels, voxel_size[0], unit);

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    match data {
        VolumeData::UInt8(a) => write_pages::<_, colortype::Gray8>(&mut encoder, a, &description, voxel_size),
        VolumeData::UInt16(a) => write_pages::<_, colortype::Gray16>(&mut encoder, a, &description, voxel_size),
        VolumeData::UInt32(a) => write_pages::<_, colortype::Gray32>(&mut encoder, a, &description, voxel_size),
        VolumeData::Float32(a) => {
            write_pages::<_, colortype::Gray32Float>(&mut encoder, a, &description, voxel_size)
        }
        VolumeData::Float64(a) => {
            write_pages::<_, colortype::Gray64Float>(&mut encoder, a, &description, voxel_size)
        }
        VolumeData::Int32(_) => Err(crate::Error::invalid("int32 TIFF output is not supported")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn imagej_description() {
        let d = ImageJDescription::parse("ImageJ=1.53t\nimages=6\nchannels=2\nslices=3\nunit=\\u00B5m\nspacing=0.5\n")
            .unwrap();
        assert_eq!((d.channels, d.slices), (2, 3));
        assert_eq!(d.spacing, Some(0.5));
        assert_eq!(d.unit.as_deref(), Some("µm"));
        assert!(ImageJDescription::parse("written by something else").is_none());
    }

    #[test]
    fn stack_keeps_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 4, 5]), |d| (d[0] * 100 + d[1] * 10 + d[2]) as u16);
        write_tiff(&path, &data.clone().into(), [2.0, 0.5, 0.25], SpaceUnit::Micrometer).unwrap();

        let loaded = read_tiff(&path).unwrap();
        assert_eq!(loaded.data, VolumeData::UInt16(data));
        assert_eq!(loaded.voxel_size, [2.0, 0.5, 0.25]);
        assert_eq!(loaded.unit, SpaceUnit::Micrometer);
    }

    #[test]
    fn hyperstack_is_zcyx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hyper.tif");
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 2, 4, 4]), |d| (d[0] * 10 + d[1]) as u8);
        write_tiff(&path, &data.clone().into(), [1.0, 1.0, 1.0], SpaceUnit::Nanometer).unwrap();

        let loaded = read_tiff(&path).unwrap();
        assert_eq!(loaded.data.shape(), &[3, 2, 4, 4]);
        assert_eq!(loaded.data, VolumeData::UInt8(data));
        assert_eq!(loaded.unit, SpaceUnit::Nanometer);
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            read_tiff(Path::new("/definitely/not/here.tif")),
            Err(crate::Error::InputNotFound(_))
        ));
    }
}
