use std::fmt;

#[derive(Debug)]
pub enum ShotPressError {
    /// The requested text raster would exceed the configured pixel-area cap.
    RasterLimitExceeded { requested_px: u64, cap_px: u64 },
    /// The page-drawing surface rejected a primitive or failed to serialize.
    SurfacePrimitive(String),
    InvalidConfiguration(String),
    Cancelled,
    Io(std::io::Error),
}

impl fmt::Display for ShotPressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShotPressError::RasterLimitExceeded {
                requested_px,
                cap_px,
            } => {
                write!(
                    f,
                    "text raster of {} px exceeds the {} px cap",
                    requested_px, cap_px
                )
            }
            ShotPressError::SurfacePrimitive(message) => {
                write!(f, "drawing surface failure: {}", message)
            }
            ShotPressError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ShotPressError::Cancelled => write!(f, "export cancelled before finalize"),
            ShotPressError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ShotPressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShotPressError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ShotPressError {
    fn from(value: std::io::Error) -> Self {
        ShotPressError::Io(value)
    }
}

/// A per-shot problem that was recovered during export (the run continues).
///
/// Today the only recovered condition is an image payload that fails to
/// decode; the slot degrades to a placeholder fill and the export reports
/// the shot here instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportWarning {
    pub shot_index: u32,
    pub message: String,
}

impl fmt::Display for ExportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shot {}: {}", self.shot_index, self.message)
    }
}
