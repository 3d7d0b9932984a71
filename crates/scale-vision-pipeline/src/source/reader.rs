// crates/scale-vision-pipeline/src/source/reader.rs
//
// MediaReader: stateful ffmpeg demux+decode+scale to packed BGR24 at native
// resolution. Shared by the file source, the camera source, and the
// on-demand predict path.

use std::path::Path;

use anyhow::{anyhow, Result};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, input_with_dictionary, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use scale_vision_core::types::BgrImage;

pub struct MediaReader {
    ictx:      ffmpeg::format::context::Input,
    decoder:   ffmpeg::decoder::video::Video,
    video_idx: usize,
    scaler:    SwsContext,
    tb_num:    i32,
    tb_den:    i32,
    last_pts:  i64,
    out_w:     u32,
    out_h:     u32,
    /// Stream average frame rate, 0.0 when the container doesn't know.
    pub fps:   f64,
}

// FFmpeg's raw pointers inside `Input`/`Video`/`SwsContext` are not
// auto-derived `Send`, but `MediaReader` has sole ownership of all of them
// and is only ever accessed from the single thread that owns it.
unsafe impl Send for MediaReader {}

impl MediaReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::build(input(&path)?)
    }

    /// Open with demuxer options — used for capture devices where the
    /// framerate has to be requested up front.
    pub fn open_with(path: &Path, options: ffmpeg::Dictionary) -> Result<Self> {
        Self::build(input_with_dictionary(&path, options)?)
    }

    fn build(ictx: ffmpeg::format::context::Input) -> Result<Self> {
        let (video_idx, tb_num, tb_den, fps, params) = {
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| anyhow!("no video stream"))?;
            let tb = stream.time_base();
            let rate = stream.avg_frame_rate();
            let fps = if rate.denominator() != 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            };
            (stream.index(), tb.numerator(), tb.denominator(), fps, stream.parameters())
        };

        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(params)?;
        let decoder = dec_ctx.decoder().video()?;

        let out_w = decoder.width().max(2);
        let out_h = decoder.height().max(2);
        let scaler = SwsContext::get(
            decoder.format(), decoder.width(), decoder.height(),
            Pixel::BGR24, out_w, out_h, Flags::BILINEAR,
        )?;

        Ok(Self {
            ictx, decoder, video_idx, scaler,
            tb_num, tb_den,
            last_pts: -1,
            out_w, out_h, fps,
        })
    }

    /// Seek to roughly `ms` into the container (lands on the nearest
    /// keyframe before it).
    pub fn seek_ms(&mut self, ms: u64) {
        if self.tb_num == 0 {
            return;
        }
        let ts = (ms as f64 / 1000.0 * self.tb_den as f64 / self.tb_num as f64) as i64;
        let _ = self.ictx.seek(ts, ..ts);
    }

    /// Decode the next frame sequentially. Returns `(pixels, position_secs)`
    /// or `None` at EOF / on a decode failure.
    pub fn next_frame(&mut self) -> Option<(BgrImage, f64)> {
        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.video_idx {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(self.last_pts + 1);
                self.last_pts = pts;

                let mut out = ffmpeg::util::frame::video::Video::empty();
                if self.scaler.run(&decoded, &mut out).is_err() {
                    return None;
                }
                // Destripe: copy only visible pixels, not stride padding.
                let stride = out.stride(0);
                let raw    = out.data(0);
                let row_bytes = self.out_w as usize * 3;
                let data: Vec<u8> = (0..self.out_h as usize)
                    .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
                    .copied()
                    .collect();

                let pos = pts as f64 * self.tb_num as f64 / self.tb_den as f64;
                return Some((BgrImage { data, width: self.out_w, height: self.out_h }, pos));
            }
        }
        None
    }
}
