// crates/scale-vision-pipeline/src/normalize.rs
//
// Pure resize to the fixed inference geometry. BGR in, BGR out. The sws
// scaler is cached and rebuilt only when the input geometry changes (a
// camera renegotiating its mode, a new file looping in).

use anyhow::{bail, Result};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use scale_vision_core::config::NormalizeConfig;
use scale_vision_core::types::BgrImage;

struct CachedScaler {
    in_w: u32,
    in_h: u32,
    ctx:  SwsContext,
}

pub struct Normalizer {
    width:  u32,
    height: u32,
    scaler: Option<CachedScaler>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self { width: config.width, height: config.height, scaler: None }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn normalize(&mut self, image: &BgrImage) -> Result<BgrImage> {
        let expected = image.width as usize * image.height as usize * 3;
        if image.width == 0 || image.height == 0 || image.data.len() != expected {
            bail!(
                "bad frame geometry: {}x{} with {} bytes",
                image.width, image.height, image.data.len()
            );
        }
        if image.width == self.width && image.height == self.height {
            return Ok(image.clone());
        }

        let rebuild = match &self.scaler {
            Some(cached) => cached.in_w != image.width || cached.in_h != image.height,
            None => true,
        };
        if rebuild {
            let ctx = SwsContext::get(
                Pixel::BGR24, image.width, image.height,
                Pixel::BGR24, self.width, self.height,
                Flags::BILINEAR,
            )?;
            self.scaler = Some(CachedScaler { in_w: image.width, in_h: image.height, ctx });
        }

        let mut src = ffmpeg::util::frame::video::Video::new(
            Pixel::BGR24, image.width, image.height,
        );
        let src_stride = src.stride(0);
        let src_row = image.width as usize * 3;
        {
            let data = src.data_mut(0);
            for row in 0..image.height as usize {
                data[row * src_stride..row * src_stride + src_row]
                    .copy_from_slice(&image.data[row * src_row..(row + 1) * src_row]);
            }
        }

        let mut out = ffmpeg::util::frame::video::Video::empty();
        let scaler = self.scaler.as_mut().expect("scaler built above");
        scaler.ctx.run(&src, &mut out)?;

        let stride = out.stride(0);
        let raw    = out.data(0);
        let row_bytes = self.width as usize * 3;
        let data: Vec<u8> = (0..self.height as usize)
            .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
            .copied()
            .collect();

        Ok(BgrImage { data, width: self.width, height: self.height })
    }
}
