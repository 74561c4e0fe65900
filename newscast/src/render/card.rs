//! Title cards rendered with the encoder binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::paths::ChannelPaths;
use super::traits::{AssetGenerator, RenderRequest, RenderedAsset};
use crate::database::SqliteItemStore;
use crate::domain::{ChannelId, DisplayMode, truncate_chars};
use crate::encoder::{EncoderInvocation, EncoderOutcome, ProcessSettings, escape_drawtext, run_to_completion};
use crate::{Error, Result};

const BACKGROUND_COLOR: &str = "0x050508";
const ACCENT_COLOR: &str = "0x00d4ff";
const TITLE_CHARS: usize = 90;
const TITLE_LINE_CHARS: usize = 45;
const SUMMARY_LINE_CHARS: usize = 70;
const SUMMARY_MAX_LINES: usize = 8;

/// Renders one PNG card per item into the channel frames directory.
pub struct FfmpegCardRenderer {
    binary_path: String,
    data_dir: PathBuf,
    width: u32,
    height: u32,
    font: Option<PathBuf>,
    process: ProcessSettings,
    frame_sink: Option<Arc<SqliteItemStore>>,
}

impl FfmpegCardRenderer {
    pub fn new(binary_path: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            data_dir: data_dir.into(),
            width: 1920,
            height: 1080,
            font: None,
            process: ProcessSettings::default(),
            frame_sink: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_font(mut self, font: impl Into<PathBuf>) -> Self {
        self.font = Some(font.into());
        self
    }

    /// Record generated frame paths on the stored items.
    pub fn with_frame_sink(mut self, store: Arc<SqliteItemStore>) -> Self {
        self.frame_sink = Some(store);
        self
    }

    fn paths(&self, channel_id: ChannelId) -> ChannelPaths {
        ChannelPaths::new(&self.data_dir, channel_id)
    }

    fn text(&self, text: &str, size: u32, color: &str, x: &str, y: u32) -> String {
        let font = self
            .font
            .as_deref()
            .map(|f| format!("fontfile={}:", f.display()))
            .unwrap_or_default();
        format!(
            "drawtext=text='{}':{font}fontsize={size}:fontcolor={color}:x={x}:y={y}",
            escape_drawtext(text)
        )
    }

    /// Filters for a full-screen card.
    fn card_filters(&self, request: &RenderRequest<'_>) -> Vec<String> {
        let item = request.item;
        let margin = self.width / 16;
        let mut filters = vec![format!(
            "drawbox=x=0:y=0:w=iw:h=12:color={ACCENT_COLOR}:t=fill"
        )];

        let mut y = self.height / 8;
        let title = truncate_chars(&item.title, TITLE_CHARS);
        for line in wrap_text(&title, TITLE_LINE_CHARS) {
            filters.push(self.text(&line, 64, "white", &margin.to_string(), y));
            y += 80;
        }

        y += 40;
        let mut summary = wrap_text(&item.summary, SUMMARY_LINE_CHARS);
        if summary.len() > SUMMARY_MAX_LINES {
            summary.truncate(SUMMARY_MAX_LINES);
            if let Some(last) = summary.last_mut() {
                last.push_str("...");
            }
        }
        for line in summary {
            filters.push(self.text(&line, 36, "0xd0d0d0", &margin.to_string(), y));
            y += 50;
        }

        if !item.source_name.is_empty() {
            filters.push(self.text(
                &format!("Source: {}", item.source_name),
                28,
                ACCENT_COLOR,
                &margin.to_string(),
                self.height.saturating_sub(120),
            ));
        }
        filters
    }

    /// Filters for a lower-third overlay on a transparent canvas.
    fn overlay_filters(&self, request: &RenderRequest<'_>) -> Vec<String> {
        let item = request.item;
        let margin = self.width / 24;
        let panel_top = self.height.saturating_sub(330);
        let mut filters = vec![
            format!("drawbox=x=0:y={panel_top}:w=iw:h=260:color=black@0.65:t=fill"),
            format!("drawbox=x=0:y={panel_top}:w=iw:h=6:color={ACCENT_COLOR}:t=fill"),
        ];
        let title = truncate_chars(&item.title, TITLE_CHARS);
        filters.push(self.text(&title, 52, "white", &margin.to_string(), panel_top + 40));
        if let Some(first) = wrap_text(&item.summary, SUMMARY_LINE_CHARS + 30).into_iter().next() {
            filters.push(self.text(&first, 32, "0xd0d0d0", &margin.to_string(), panel_top + 120));
        }
        if !item.source_name.is_empty() {
            filters.push(self.text(
                &item.source_name,
                26,
                ACCENT_COLOR,
                &margin.to_string(),
                panel_top + 190,
            ));
        }
        filters
    }

    async fn render_png(&self, source: String, filters: Vec<String>, output: &Path) -> Result<()> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"]
            .into_iter()
            .map(str::to_string)
            .collect();
        args.push(source);
        if !filters.is_empty() {
            args.push("-vf".to_string());
            args.push(filters.join(","));
        }
        args.extend(["-frames:v".to_string(), "1".to_string()]);
        args.push(output.to_string_lossy().into_owned());

        let invocation = EncoderInvocation::custom(&self.binary_path, args);
        // Dropping this future kills the child; no external token needed.
        match run_to_completion(&invocation, &CancellationToken::new(), &self.process).await {
            EncoderOutcome::Success => Ok(()),
            outcome => Err(Error::render(format!(
                "{} ({})",
                output.display(),
                outcome.describe()
            ))),
        }
    }
}

#[async_trait]
impl AssetGenerator for FfmpegCardRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedAsset> {
        let paths = self.paths(request.channel_id);
        paths.ensure().await?;

        let size = format!("{}x{}", self.width, self.height);
        let (source, filters, output) = match request.display_mode {
            DisplayMode::Simple => (
                format!("color=c={BACKGROUND_COLOR}:s={size}:d=1"),
                self.card_filters(&request),
                paths.card_path(request.item.id),
            ),
            DisplayMode::Broadcast => (
                format!("color=c=black@0.0:s={size}:d=1,format=rgba"),
                self.overlay_filters(&request),
                paths.overlay_path(request.item.id),
            ),
        };

        debug!(
            channel_id = request.channel_id,
            item_id = request.item.id,
            "Rendering {}",
            output.display()
        );
        self.render_png(source, filters, &output).await?;

        if let Some(store) = &self.frame_sink
            && let Err(e) = store.set_frame_path(request.item.id, &output).await
        {
            warn!(item_id = request.item.id, "Failed to record frame path: {}", e);
        }

        Ok(RenderedAsset::image(output))
    }

    async fn render_transition(&self, channel_id: ChannelId) -> Result<Option<RenderedAsset>> {
        let paths = self.paths(channel_id);
        let output = paths.transition_path();
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Ok(Some(RenderedAsset::image(output)));
        }
        paths.ensure().await?;

        let size = format!("{}x{}", self.width, self.height);
        let filters = vec![
            format!("drawbox=x=0:y=ih/2-4:w=iw:h=8:color={ACCENT_COLOR}:t=fill"),
            self.text("UP NEXT", 72, "white", "(w-text_w)/2", self.height / 2 - 120),
        ];
        self.render_png(format!("color=c={BACKGROUND_COLOR}:s={size}:d=1"), filters, &output)
            .await?;
        Ok(Some(RenderedAsset::image(output)))
    }

    async fn clear(&self, channel_id: ChannelId) -> Result<()> {
        self.paths(channel_id).clear_transient().await
    }
}

/// Greedy word wrap to at most `width` characters per line.
///
/// Words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current_len += word.len();
        current.extend(word);
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueItem;

    #[test]
    fn test_wrap_text() {
        assert_eq!(
            wrap_text("the quick brown fox jumps", 10),
            vec!["the quick", "brown fox", "jumps"]
        );
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn test_card_filters_escape_text() {
        let renderer = FfmpegCardRenderer::new("ffmpeg", "/tmp").with_font("/fonts/a.ttf");
        let item = QueueItem::new(1, 1, "Breach: what's next")
            .with_summary("Details")
            .with_source("Wire", "https://example.com");
        let request = RenderRequest {
            channel_id: 1,
            item: &item,
            neighbors: &[],
            display_mode: DisplayMode::Simple,
        };
        let filters = renderer.card_filters(&request).join(",");
        assert!(filters.contains("Breach\\: what'\\''s next"));
        assert!(filters.contains("fontfile=/fonts/a.ttf:"));
        assert!(filters.contains("Source\\: Wire"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_render_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FfmpegCardRenderer::new("false", dir.path());
        let item = QueueItem::new(5, 1, "title");
        let err = renderer
            .render(RenderRequest {
                channel_id: 1,
                item: &item,
                neighbors: &[],
                display_mode: DisplayMode::Broadcast,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Render(_)), "got {err:?}");
        assert!(dir.path().join("channels/1/frames").is_dir());
    }
}
