use crate::cache::AnimationCache;
use crate::codec::encode_tile;
use crate::config::PanelConfig;
use crate::decoder::{ImageSourceDecoder, SourceDecoder};
use crate::identify::serial_tile;
use crate::resolver::resolve_cell;
use crate::tiling::{FitPolicy, TileSet, tile_image};
use crate::transport::Transport;
use anyhow::{Context, Result, bail};
use image::RgbImage;
use log::{debug, info, warn};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Frame-buffer slot the wall uploads into and commits from.
pub const FRAME_BUFFER_INDEX: u8 = 1;

/// Control command that restarts a panel's firmware.
pub const RESET_COMMAND: &str = "reset firmware";

/// What to do when a panel refuses an upload mid-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPolicy {
    /// Log the failure and keep sending to the remaining panels.
    #[default]
    BestEffort,
    /// Stop the frame at the failing panel and propagate the error. Later
    /// panels keep whatever they showed before.
    AbortFrame,
}

/// Process-scoped service driving the wall. Owns the configuration, the
/// panel link, the source decoder, and the animation cache; everything a
/// playback or identify pass needs goes through here.
pub struct PanelWall<T: Transport> {
    config: PanelConfig,
    transport: T,
    decoder: Box<dyn SourceDecoder>,
    cache: AnimationCache,
    send_policy: SendPolicy,
}

impl<T: Transport> PanelWall<T> {
    pub fn new(config: PanelConfig, transport: T) -> Self {
        Self::with_decoder(config, transport, Box::new(ImageSourceDecoder))
    }

    pub fn with_decoder(
        config: PanelConfig,
        transport: T,
        decoder: Box<dyn SourceDecoder>,
    ) -> Self {
        Self {
            config,
            transport,
            decoder,
            cache: AnimationCache::new(),
            send_policy: SendPolicy::default(),
        }
    }

    pub fn set_send_policy(&mut self, policy: SendPolicy) {
        self.send_policy = policy;
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache(&self) -> &AnimationCache {
        &self.cache
    }

    /// Decode `path` and show it: stills hold for `duration`, animations
    /// loop until `duration` of frame time has played. The decoded result
    /// of an animation is kept, so a source is only ever decoded once.
    pub fn show_source(&self, path: &Path, duration: Duration) -> Result<()> {
        if self.cache.contains(path) {
            return self.show_animation(path, duration);
        }
        let sequence = self.decoder.decode(path)?;
        if sequence.frame_count() > 1 {
            self.cache.insert_sequence(
                path,
                sequence,
                self.config.tile_size(),
                self.config.cols(),
                self.config.rows(),
            );
            self.show_animation(path, duration)
        } else {
            let frame = &sequence.frames()[0];
            self.show_static(&frame.image, duration)
        }
    }

    /// Tile one image across the wall, push it to every panel, then hold.
    pub fn show_static(&self, image: &RgbImage, hold: Duration) -> Result<()> {
        let tiles = tile_image(
            image,
            self.config.tile_size(),
            self.config.cols(),
            self.config.rows(),
            FitPolicy::Scale,
        );
        self.dispatch_tiles(&tiles)?;
        thread::sleep(hold);
        Ok(())
    }

    /// Play a prepared animation until at least `minimum` of frame time has
    /// elapsed. A started pass always runs to its end. Pacing subtracts the
    /// measured dispatch cost from each frame's delay; when dispatch alone
    /// overruns the delay the next frame starts immediately.
    pub fn show_animation(&self, path: &Path, minimum: Duration) -> Result<()> {
        let frames = self.cache.prepare(
            path,
            self.decoder.as_ref(),
            self.config.tile_size(),
            self.config.cols(),
            self.config.rows(),
        )?;
        if frames.is_empty() {
            bail!("No frames prepared for {path:?}");
        }

        let mut played = Duration::ZERO;
        loop {
            for frame in frames.iter() {
                let start = Instant::now();
                self.dispatch_tiles(&frame.tiles)?;
                played += frame.delay;
                if let Some(remaining) = frame.delay.checked_sub(start.elapsed()) {
                    if !remaining.is_zero() {
                        thread::sleep(remaining);
                    }
                }
            }
            if played >= minimum {
                break;
            }
        }
        debug!("Played {path:?} for {:.2}s", played.as_secs_f32());
        Ok(())
    }

    /// Send the firmware reset command to every panel.
    pub fn reset_all(&self) -> Result<()> {
        info!("Resetting all panels");
        for (row, col, _) in self.config.cells() {
            let destination = resolve_cell(&self.config, &self.transport, row, col)?;
            self.transport
                .send_command(RESET_COMMAND, &destination)
                .with_context(|| format!("Failed to reset panel at row {row}, column {col}"))?;
        }
        Ok(())
    }

    /// Show every panel its own serial number, tinted by grid position, so
    /// wiring can be checked against the mapping by eye.
    pub fn show_serials(&self) -> Result<()> {
        info!("Displaying panel serial numbers");
        let tile_size = self.config.tile_size();
        let rows = self
            .config
            .mapping
            .iter()
            .enumerate()
            .map(|(row, serials)| {
                serials
                    .iter()
                    .enumerate()
                    .map(|(col, serial)| serial_tile(*serial, row, col, tile_size))
                    .collect()
            })
            .collect();
        self.dispatch_tiles(&TileSet::from_rows(rows))
    }

    /// Row-major upload of one frame's tiles. Resolution failures always
    /// abort; transport failures follow the send policy.
    fn dispatch_tiles(&self, tiles: &TileSet) -> Result<()> {
        for (row, col, tile) in tiles.cells() {
            let destination = resolve_cell(&self.config, &self.transport, row, col)?;
            let wire = encode_tile(tile);
            let sent = self
                .transport
                .send_pixel_buffer(&destination, FRAME_BUFFER_INDEX, &wire)
                .and_then(|_| self.transport.commit_frame(&destination, FRAME_BUFFER_INDEX));
            if let Err(e) = sent {
                match self.send_policy {
                    SendPolicy::BestEffort => {
                        warn!("Panel at row {row}, column {col} not updated: {e:#}");
                    }
                    SendPolicy::AbortFrame => {
                        return Err(e).with_context(|| {
                            format!("Dispatch aborted at row {row}, column {col}")
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{CountingDecoder, FixedDecoder, FrameSequence, SourceFrame};
    use crate::resolver::ResolveError;
    use crate::transport::{RecordingTransport, TransportCall};

    fn grid_config() -> PanelConfig {
        serde_json::from_str(
            r#"{
                "settings": { "dimensions": [18, 18] },
                "inventory": [
                    { "serial_number": 1, "ipv6_link_local": "fe80::1" },
                    { "serial_number": 2, "ipv6_link_local": "fe80::2" },
                    { "serial_number": 3, "ipv6_link_local": "fe80::3" },
                    { "serial_number": 4, "ipv6_link_local": "fe80::4" }
                ],
                "mapping": [[1, 2], [3, 4]]
            }"#,
        )
        .unwrap()
    }

    fn single_panel_config() -> PanelConfig {
        serde_json::from_str(
            r#"{
                "settings": { "dimensions": [18, 18] },
                "inventory": [{ "serial_number": 1, "ipv6_link_local": "fe80::1" }],
                "mapping": [[1]]
            }"#,
        )
        .unwrap()
    }

    fn animated_decoder(delays_ms: &[u64]) -> CountingDecoder<FixedDecoder> {
        let frames = delays_ms
            .iter()
            .map(|ms| SourceFrame {
                image: RgbImage::new(36, 36),
                delay: Duration::from_millis(*ms),
            })
            .collect();
        CountingDecoder::new(FixedDecoder::new(FrameSequence::new(frames)))
    }

    fn commit_destinations(calls: &[TransportCall]) -> Vec<String> {
        calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Commit { destination, .. } => Some(destination.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_static_dispatch_row_major_upload_then_commit() {
        let wall = PanelWall::new(grid_config(), RecordingTransport::new());
        let image = RgbImage::from_pixel(36, 36, image::Rgb([255, 0, 0]));

        wall.show_static(&image, Duration::ZERO).unwrap();

        let calls = wall.transport().calls();
        assert_eq!(calls.len(), 12);
        for chunk in calls.chunks(3) {
            assert!(matches!(chunk[0], TransportCall::Resolve { .. }));
            assert!(matches!(
                chunk[1],
                TransportCall::PixelBuffer {
                    buffer_index: FRAME_BUFFER_INDEX,
                    ..
                }
            ));
            assert!(matches!(
                chunk[2],
                TransportCall::Commit {
                    buffer_index: FRAME_BUFFER_INDEX,
                    ..
                }
            ));
        }
        let order: Vec<String> = calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Resolve { link_local } => Some(link_local.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["fe80::1", "fe80::2", "fe80::3", "fe80::4"]);
    }

    #[test]
    fn test_static_buffers_have_wire_length() {
        let wall = PanelWall::new(grid_config(), RecordingTransport::new());
        let image = RgbImage::from_pixel(100, 70, image::Rgb([0, 128, 0]));

        wall.show_static(&image, Duration::ZERO).unwrap();

        for call in wall.transport().calls() {
            if let TransportCall::PixelBuffer { bytes, .. } = call {
                assert_eq!(bytes.len(), 1944);
            }
        }
    }

    #[test]
    fn test_best_effort_continues_past_failing_panel() {
        let transport = RecordingTransport::new();
        transport.fail_sends_to("fe80::2");
        let wall = PanelWall::new(grid_config(), transport);
        let image = RgbImage::new(36, 36);

        wall.show_static(&image, Duration::ZERO).unwrap();

        let commits = commit_destinations(&wall.transport().calls());
        assert_eq!(commits.len(), 3);
        assert!(commits.iter().all(|d| !d.starts_with("[fe80::2")));
    }

    #[test]
    fn test_abort_frame_stops_at_failing_panel() {
        let transport = RecordingTransport::new();
        transport.fail_sends_to("fe80::2");
        let mut wall = PanelWall::new(grid_config(), transport);
        wall.set_send_policy(SendPolicy::AbortFrame);
        let image = RgbImage::new(36, 36);

        let result = wall.show_static(&image, Duration::ZERO);
        assert!(result.is_err());

        let calls = wall.transport().calls();
        // first panel went through, second failed before recording, none after
        assert_eq!(commit_destinations(&calls).len(), 1);
        assert!(matches!(
            calls.last().unwrap(),
            TransportCall::Resolve { link_local } if link_local == "fe80::2"
        ));
    }

    #[test]
    fn test_unmapped_serial_aborts_despite_best_effort() {
        let config: PanelConfig = serde_json::from_str(
            r#"{
                "settings": { "dimensions": [18, 18] },
                "inventory": [{ "serial_number": 1, "ipv6_link_local": "fe80::1" }],
                "mapping": [[1, 999]]
            }"#,
        )
        .unwrap();
        let wall = PanelWall::new(config, RecordingTransport::new());
        let image = RgbImage::new(36, 36);

        let err = wall.show_static(&image, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::UnknownSerial { serial: 999, .. })
        ));
    }

    #[test]
    fn test_animation_completes_full_passes() {
        let decoder = animated_decoder(&[10, 20, 30]);
        let wall = PanelWall::with_decoder(
            single_panel_config(),
            RecordingTransport::new(),
            Box::new(decoder),
        );

        // one pass is 60ms of frame time, so 100ms needs two full passes
        wall.show_animation(Path::new("anim.gif"), Duration::from_millis(100))
            .unwrap();

        let uploads = wall
            .transport()
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::PixelBuffer { .. }))
            .count();
        assert_eq!(uploads, 6);
    }

    #[test]
    fn test_animation_zero_minimum_plays_one_pass() {
        let decoder = animated_decoder(&[10, 10]);
        let wall = PanelWall::with_decoder(
            single_panel_config(),
            RecordingTransport::new(),
            Box::new(decoder),
        );

        wall.show_animation(Path::new("anim.gif"), Duration::ZERO)
            .unwrap();

        let uploads = wall
            .transport()
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::PixelBuffer { .. }))
            .count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn test_show_source_decodes_animation_once() {
        let decoder = animated_decoder(&[10, 10]);
        let counter = decoder.counter();
        let wall = PanelWall::with_decoder(
            single_panel_config(),
            RecordingTransport::new(),
            Box::new(decoder),
        );
        let path = Path::new("anim.gif");

        wall.show_source(path, Duration::ZERO).unwrap();
        wall.show_source(path, Duration::ZERO).unwrap();

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(wall.cache().contains(path));
    }

    #[test]
    fn test_show_source_does_not_cache_stills() {
        let decoder = animated_decoder(&[10]);
        let wall = PanelWall::with_decoder(
            single_panel_config(),
            RecordingTransport::new(),
            Box::new(decoder),
        );
        let path = Path::new("still.png");

        wall.show_source(path, Duration::ZERO).unwrap();

        assert!(wall.cache().is_empty());
        let uploads = wall
            .transport()
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::PixelBuffer { .. }))
            .count();
        assert_eq!(uploads, 1);
    }

    #[test]
    fn test_reset_then_serials_sequence() {
        let wall = PanelWall::new(grid_config(), RecordingTransport::new());

        wall.reset_all().unwrap();
        wall.show_serials().unwrap();

        let calls = wall.transport().calls();
        let commands: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Command { command, .. } => Some(command.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(commands, vec![RESET_COMMAND; 4]);

        let uploads = calls
            .iter()
            .filter(|c| matches!(c, TransportCall::PixelBuffer { .. }))
            .count();
        assert_eq!(uploads, 4);
    }

    #[test]
    fn test_serial_tiles_carry_gradient_tint() {
        let wall = PanelWall::new(grid_config(), RecordingTransport::new());
        wall.show_serials().unwrap();

        let calls = wall.transport().calls();
        let buffers: Vec<&Vec<u8>> = calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::PixelBuffer { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(buffers.len(), 4);

        // row 1, col 0 tile: red 225, green 255; scan red/green wire slots
        let tile = buffers[2];
        assert!(tile.chunks(6).any(|px| px[0] == 225 && px[2] == 255));
        assert!(tile.chunks(6).all(|px| px[4] == 0));
    }
}
