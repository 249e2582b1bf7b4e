pub mod assistant;
pub mod config;
pub mod curriculum;
pub mod error;
pub mod illustration;
pub mod notation;
pub mod playback;
pub mod reader;
pub mod transcript;
pub mod widget;

pub use assistant::{AssistantPanel, AssistantService, GeminiClient, Message, Role};
pub use config::Config;
pub use curriculum::{Chapter, ContentItem, Curriculum};
pub use error::*;
pub use notation::{compile, to_svg, CompiledScore, ElementId, RenderOptions, VisualScore};
pub use playback::{AudioScore, PlaybackStatus, Transport};
pub use reader::Reader;
pub use transcript::{segment, Segment, SegmentKind};
pub use widget::NotationWidget;

/// Compile a score source and draw it as SVG.
/// Element ids in the output are prefixed with `id_prefix`.
pub fn render_svg(source: &str, options: &RenderOptions, id_prefix: &str) -> Result<String, NotationParseError> {
    let score = compile(source, options)?;
    Ok(to_svg(&score.visual, id_prefix))
}
