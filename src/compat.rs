//! Version compatibility between this crate and its segmentation backend.

use semver::{Version, VersionReq};

/// Backend version this crate's parameter sets were written against.
pub const REQUIRED_BACKEND_VERSION: &str = "=1.8.1";

/// Outcome of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityReport {
    pub required: VersionReq,
    /// The version string reported by the backend.
    pub found: String,
    /// `None` if `found` is not a valid semver version.
    pub parsed: Option<Version>,
}

impl CompatibilityReport {
    pub fn is_compatible(&self) -> bool {
        self.parsed
            .as_ref()
            .is_some_and(|v| self.required.matches(v))
    }

    /// Turn an incompatible report into an error.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.is_compatible() {
            Ok(self)
        } else {
            Err(crate::Error::Incompatible(format!(
                "backend version {} does not satisfy {}",
                self.found, self.required
            )))
        }
    }
}

/// Compare a backend's reported version against `required`.
pub fn check_compatibility(required: &str, found: &str) -> crate::Result<CompatibilityReport> {
    let required = VersionReq::parse(required).map_err(crate::Error::wrap)?;
    let parsed = match Version::parse(found.trim()) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("could not parse backend version {found:?}: {e}");
            None
        }
    };
    Ok(CompatibilityReport {
        required,
        found: found.to_string(),
        parsed,
    })
}
