mod progress;

pub use crate::progress::{ProgressBar, ProgressDrawMode, ProgressSpeed};
