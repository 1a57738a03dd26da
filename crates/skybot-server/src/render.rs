use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use resvg::tiny_skia;

use skybot_engine::ImageRenderer;

/// SVG to PNG with resvg. The longest side of the output is scaled to
/// `max_side` pixels.
pub struct ResvgRenderer {
    fontdb: Arc<usvg::fontdb::Database>,
    max_side: u32,
}

impl ResvgRenderer {
    pub fn new(max_side: u32) -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        Self {
            fontdb: Arc::new(fontdb),
            max_side: max_side.max(1),
        }
    }
}

impl ImageRenderer for ResvgRenderer {
    fn render_png(&self, svg: &str) -> Result<Vec<u8>> {
        let mut options = usvg::Options::default();
        options.fontdb = self.fontdb.clone();

        let tree = usvg::Tree::from_str(svg, &options).context("parsing svg")?;
        let size = tree.size();
        let scale = self.max_side as f32 / size.width().max(size.height());
        let width = (size.width() * scale).round() as u32;
        let height = (size.height() * scale).round() as u32;

        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("invalid canvas size {}x{}", width, height))?;
        pixmap.fill(tiny_skia::Color::WHITE);
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(scale, scale),
            &mut pixmap.as_mut(),
        );
        pixmap.encode_png().context("encoding png")
    }
}
