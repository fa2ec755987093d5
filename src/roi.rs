//! Regions of interest and their on-disk tables.
//!
//! A table lives at `tables/<name>` below an image group and is listed in the
//! `tables` attribute of the `tables` group. Coordinates are stored as a
//! float32 `X` matrix with one row per region and the columns of
//! [ROI_COLUMNS]; the row names are kept in the group attributes.

use std::ops::Range;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use zarrs::storage::ReadableWritableListableStorage;

use crate::metadata::Compression;
use crate::storage::{self, Attributes};

pub const ROI_COLUMNS: [&str; 6] = [
    "x_micrometer",
    "y_micrometer",
    "z_micrometer",
    "len_x_micrometer",
    "len_y_micrometer",
    "len_z_micrometer",
];

const TABLES_GROUP: &str = "tables";

/// An axis-aligned box in physical (micrometer) coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,
    /// (Z, Y, X) start.
    pub origin: [f64; 3],
    /// (Z, Y, X) length.
    pub extent: [f64; 3],
}

impl Roi {
    pub fn new(name: impl Into<String>, origin: [f64; 3], extent: [f64; 3]) -> Self {
        Self {
            name: name.into(),
            origin,
            extent,
        }
    }

    /// Convert to (Z, Y, X) pixel ranges for a level with the given pixel
    /// sizes and spatial shape.
    ///
    /// Ranges falling outside `shape`, or empty after rounding, are errors.
    pub fn pixel_ranges(
        &self,
        pixel_sizes: [f64; 3],
        shape: [usize; 3],
    ) -> crate::Result<[Range<u64>; 3]> {
        let axis = |i: usize| -> crate::Result<Range<u64>> {
            let start = (self.origin[i] / pixel_sizes[i]).round();
            let end = ((self.origin[i] + self.extent[i]) / pixel_sizes[i]).round();
            // written positively so NaN coordinates are rejected too
            if !(start >= 0.0 && end <= shape[i] as f64 && end > start) {
                return Err(crate::Error::OutOfBounds(format!(
                    "ROI {} covers pixels {start}..{end} of axis {} with extent {}",
                    self.name,
                    ['z', 'y', 'x'][i],
                    shape[i]
                )));
            }
            Ok(start as u64..end as u64)
        };
        Ok([axis(0)?, axis(1)?, axis(2)?])
    }

    fn to_row(&self) -> [f32; 6] {
        let [z, y, x] = self.origin;
        let [lz, ly, lx] = self.extent;
        [x, y, z, lx, ly, lz].map(|v| v as f32)
    }

    fn from_row(name: String, row: &[f32]) -> Self {
        let v = |i: usize| row[i] as f64;
        Self {
            name,
            origin: [v(2), v(1), v(0)],
            extent: [v(5), v(4), v(3)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RoiTableAttributes {
    #[serde(rename = "type")]
    table_type: String,
    fractal_table_version: String,
    #[serde(rename = "encoding-type")]
    encoding_type: String,
    #[serde(rename = "encoding-version")]
    encoding_version: String,
    obs_index: Vec<String>,
    var_index: Vec<String>,
}

/// An ordered list of regions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoiTable {
    pub name: String,
    pub rois: Vec<Roi>,
}

impl RoiTable {
    pub fn new(name: impl Into<String>, rois: Vec<Roi>) -> Self {
        Self {
            name: name.into(),
            rois,
        }
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Roi> {
        self.rois.iter()
    }

    /// Names of the tables stored below the image group at the store root.
    pub fn list(store: &ReadableWritableListableStorage) -> crate::Result<Vec<String>> {
        let group = storage::node_path(&[TABLES_GROUP]);
        if !storage::group_exists(store, &group) {
            return Ok(Vec::new());
        }
        let attrs = storage::read_group_attributes(store, &group)?;
        match attrs.get(TABLES_GROUP) {
            Some(v) => Ok(serde_json::from_value(v.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Write the table, replacing any table of the same name.
    pub fn write(&self, store: &ReadableWritableListableStorage) -> crate::Result<()> {
        let tables_group = storage::node_path(&[TABLES_GROUP]);
        let mut names = Self::list(store)?;
        if !names.contains(&self.name) {
            names.push(self.name.clone());
        }
        let mut attrs = Attributes::new();
        attrs.insert(TABLES_GROUP.to_string(), serde_json::to_value(&names)?);
        storage::write_group(store, &tables_group, attrs)?;

        let group = storage::node_path(&[tables_group.as_str(), self.name.as_str()]);
        storage::erase_node(store, &group)?;
        let meta = RoiTableAttributes {
            table_type: "roi_table".to_string(),
            fractal_table_version: "1".to_string(),
            encoding_type: "anndata".to_string(),
            encoding_version: "0.1.0".to_string(),
            obs_index: self.rois.iter().map(|r| r.name.clone()).collect(),
            var_index: ROI_COLUMNS.iter().map(|c| c.to_string()).collect(),
        };
        let attrs = match serde_json::to_value(&meta)? {
            serde_json::Value::Object(m) => m,
            _ => return Err(crate::Error::general("table attributes are not an object")),
        };
        storage::write_group(store, &group, attrs)?;

        let x_path = storage::node_path(&[group.as_str(), "X"]);
        let shape = [self.rois.len(), ROI_COLUMNS.len()];
        if self.rois.is_empty() {
            storage::create_array::<f32>(
                store,
                &x_path,
                &shape,
                &shape,
                &["obs", "var"],
                Compression::Raw,
            )?;
        } else {
            let rows: Vec<f32> = self.rois.iter().flat_map(|r| r.to_row()).collect();
            let data = ArrayD::from_shape_vec(IxDyn(&shape), rows)?;
            storage::write_array(store, &x_path, &data, &["obs", "var"], Compression::Raw)?;
        }
        log::info!("wrote ROI table {} with {} rows", self.name, self.rois.len());
        Ok(())
    }

    pub fn read(store: &ReadableWritableListableStorage, name: &str) -> crate::Result<Self> {
        let group = storage::node_path(&[TABLES_GROUP, name]);
        if !storage::group_exists(store, &group) {
            return Err(crate::Error::invalid(format!("no table named {name:?}")));
        }
        let attrs = storage::read_group_attributes(store, &group)?;
        let meta: RoiTableAttributes =
            serde_json::from_value(serde_json::Value::Object(attrs))?;
        if meta.table_type != "roi_table" {
            return Err(crate::Error::invalid(format!(
                "table {name:?} has unsupported type {:?}",
                meta.table_type
            )));
        }

        // columns may be stored in any order
        let columns = ROI_COLUMNS
            .iter()
            .map(|c| {
                meta.var_index
                    .iter()
                    .position(|v| v == c)
                    .ok_or_else(|| crate::Error::invalid(format!("table {name:?} has no column {c}")))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        if meta.obs_index.is_empty() {
            return Ok(Self::new(name, Vec::new()));
        }
        let x_path = storage::node_path(&[group.as_str(), "X"]);
        let shape = storage::array_shape(store, &x_path)?;
        if shape != [meta.obs_index.len(), meta.var_index.len()] {
            return Err(crate::Error::ShapeMismatch {
                layout: "obs,var".to_string(),
                left: shape,
                right: vec![meta.obs_index.len(), meta.var_index.len()].into(),
            });
        }
        let x = storage::read_region::<f32>(store, &x_path, &storage::full_ranges(&shape))?;
        let rois = meta
            .obs_index
            .into_iter()
            .enumerate()
            .map(|(i, roi_name)| {
                let row: Vec<f32> = columns.iter().map(|&c| x[[i, c]]).collect();
                Roi::from_row(roi_name, &row)
            })
            .collect();
        Ok(Self::new(name, rois))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_ranges_round() {
        let roi = Roi::new("FOV_1", [0.0, 1.0, 2.0], [2.0, 2.0, 2.0]);
        let [z, y, x] = roi.pixel_ranges([1.0, 0.5, 0.5], [4, 10, 10]).unwrap();
        assert_eq!((z, y, x), (0..2, 2..6, 4..8));
    }

    #[test]
    fn out_of_bounds_roi() {
        let roi = Roi::new("big", [0.0, 0.0, 0.0], [1.0, 10.0, 1.0]);
        assert!(matches!(
            roi.pixel_ranges([1.0, 1.0, 1.0], [1, 8, 8]),
            Err(crate::Error::OutOfBounds(_))
        ));
        let empty = Roi::new("empty", [0.0, 0.0, 0.0], [1.0, 0.1, 1.0]);
        assert!(empty.pixel_ranges([1.0, 1.0, 1.0], [1, 8, 8]).is_err());
        let nan = Roi::new("nan", [0.0, f64::NAN, 0.0], [1.0, f64::NAN, 1.0]);
        assert!(matches!(
            nan.pixel_ranges([1.0, 1.0, 1.0], [2, 8, 8]),
            Err(crate::Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn table_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage::open_store(dir.path()).unwrap();
        storage::write_group(&store, "/", Attributes::new()).unwrap();
        assert!(RoiTable::list(&store).unwrap().is_empty());

        let table = RoiTable::new(
            "FOV_ROI_table",
            vec![
                Roi::new("FOV_1", [0.0, 0.0, 0.0], [1.0, 4.0, 4.0]),
                Roi::new("FOV_2", [0.0, 4.0, 4.0], [1.0, 4.0, 4.0]),
            ],
        );
        table.write(&store).unwrap();
        RoiTable::new("empty", vec![]).write(&store).unwrap();

        assert_eq!(RoiTable::list(&store).unwrap(), vec!["FOV_ROI_table", "empty"]);
        assert_eq!(RoiTable::read(&store, "FOV_ROI_table").unwrap(), table);
        assert!(RoiTable::read(&store, "empty").unwrap().is_empty());
        assert!(RoiTable::read(&store, "missing").is_err());

        let attrs = storage::read_group_attributes(&store, "/tables/FOV_ROI_table").unwrap();
        assert_eq!(attrs["type"], "roi_table");
        assert_eq!(attrs["fractal_table_version"], "1");
    }
}
