// glint: GPU-accelerated keypoint detection with a composable algorithm
// contract and a shared binary record layout for GPU-resident keypoints.
//
// Keypoints live on the GPU as fixed-size binary records packed into a
// texture (see `encoding` for the layout) and are only brought back to
// the CPU through an explicit asynchronous download. Algorithms compose
// through `FeatureAlgorithmDecorator`, which grows the record layout and
// keeps every stage of a chain agreeing on it.

pub mod algorithm;
pub mod decorator;
pub mod encoding;
pub mod globals;
pub mod gpu;
pub mod keypoint;

pub use algorithm::{FeatureAlgorithm, FeatureError};
pub use decorator::FeatureAlgorithmDecorator;
pub use gpu::device::{GpuDevice, GpuError, WorkgroupSize};
pub use gpu::encoded::{KeypointReadback, KeypointTexture};
pub use gpu::fast::FastKeypointDetector;
pub use gpu::image::GpuImage;
pub use gpu::orientation::OrientationDecorator;
pub use keypoint::Keypoint;
