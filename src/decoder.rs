use anyhow::{Context, Result, bail};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One decoded frame: opaque RGB pixels plus the source-declared delay
/// before the next frame. Stills carry a zero delay.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub image: RgbImage,
    pub delay: Duration,
}

/// A decoded source. Callers branch on `frame_count`, not on the file
/// format: one frame means a still, more means an animation.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<SourceFrame>,
}

impl FrameSequence {
    pub fn new(frames: Vec<SourceFrame>) -> Self {
        Self { frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn frames(&self) -> &[SourceFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<SourceFrame> {
        self.frames
    }
}

/// Trait for abstracting source decoding to enable testing
pub trait SourceDecoder {
    fn decode(&self, path: &Path) -> Result<FrameSequence>;
}

/// Real decoder built on the image crate. GIFs go through the animation
/// decoder, everything else is read as a single still.
pub struct ImageSourceDecoder;

impl SourceDecoder for ImageSourceDecoder {
    fn decode(&self, path: &Path) -> Result<FrameSequence> {
        let is_gif = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gif"))
            .unwrap_or(false);
        if is_gif {
            decode_gif(path)
        } else {
            decode_still(path)
        }
    }
}

fn decode_still(path: &Path) -> Result<FrameSequence> {
    let img = image::open(path).with_context(|| format!("Failed to decode image {path:?}"))?;
    Ok(FrameSequence::new(vec![SourceFrame {
        image: img.to_rgb8(),
        delay: Duration::ZERO,
    }]))
}

fn decode_gif(path: &Path) -> Result<FrameSequence> {
    let file = File::open(path).with_context(|| format!("Failed to open {path:?}"))?;
    let decoder = GifDecoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to decode GIF {path:?}"))?;

    let mut frames = Vec::new();
    for frame in decoder.into_frames() {
        let frame = frame.with_context(|| format!("Failed to decode a frame of {path:?}"))?;
        let delay = Duration::from(frame.delay());
        // Frames arrive as RGBA on the full logical screen; flatten to
        // opaque RGB so every downstream consumer sees a complete image.
        let image = DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
        frames.push(SourceFrame { image, delay });
    }
    if frames.is_empty() {
        bail!("GIF {path:?} contains no frames");
    }
    Ok(FrameSequence::new(frames))
}

/// Decoder that returns copies of a fixed sequence, for tests.
pub struct FixedDecoder {
    sequence: FrameSequence,
}

impl FixedDecoder {
    pub fn new(sequence: FrameSequence) -> Self {
        Self { sequence }
    }
}

impl SourceDecoder for FixedDecoder {
    fn decode(&self, _path: &Path) -> Result<FrameSequence> {
        Ok(self.sequence.clone())
    }
}

/// Wrapper that counts how many times decoding actually ran. The counter
/// handle stays valid after the decoder moves behind a trait object.
pub struct CountingDecoder<D> {
    inner: D,
    decodes: Arc<AtomicUsize>,
}

impl<D> CountingDecoder<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            decodes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.decodes.clone()
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl<D: SourceDecoder> SourceDecoder for CountingDecoder<D> {
    fn decode(&self, path: &Path) -> Result<FrameSequence> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(path)
    }
}
