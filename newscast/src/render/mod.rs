//! Visual asset generation.
//!
//! The broadcast core treats rendering as an opaque, possibly slow step that
//! yields a file path. The generators here are the concrete collaborators.

mod card;
mod paths;
mod prerendered;
mod traits;

pub use card::{FfmpegCardRenderer, wrap_text};
pub use paths::ChannelPaths;
pub use prerendered::StaticAssetGenerator;
pub use traits::{AssetGenerator, AssetKind, RenderRequest, RenderedAsset};
