use std::{ fs::File, path::Path };

use image::{
  Delay, Frame, Rgba, RgbaImage,
  codecs::gif::{ GifEncoder, Repeat },
};

use crate::{
  error::{ GanError, Result },
  Tensor,
};


/// Milliseconds each frame is shown.
pub const FRAME_DELAY_MS: u32 = 100;


fn to_grey(value: f32) -> u8 {
  ((value.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
}

/// Write a `[height, width, 1]` image with values in `[-1, 1]` as a looping grey GIF.

pub fn encode_gif(image: &Tensor<f32>, path: &Path) -> Result<()> {
  let dims = image.dims();
  if dims.len() != 3 || dims[2] != 1 {
    return Err(GanError::shape("[height, width, 1]", image.shape()))
  }
  let (height, width) = (dims[0], dims[1]);
  let values = image.to_vec();
  let buffer = RgbaImage::from_fn(width as u32, height as u32, |x, y| {
    let grey = to_grey(values[y as usize * width + x as usize]);
    Rgba([grey, grey, grey, 255])
  });

  let file = File::create(path)?;
  let mut encoder = GifEncoder::new(file);
  encoder.set_repeat(Repeat::Infinite)?;
  encoder.encode_frame(Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1)))?;
  Ok(())
}

/// Read the first channel of an image file as `[height, width, 1]`, scaled to `[0, 1]`.

pub fn load_image(path: &Path) -> Result<Tensor<f32>> {
  let image = image::open(path)?.to_rgba8();
  let (width, height) = image.dimensions();
  let values = image.pixels().map(|pixel| pixel[0] as f32 / 255.0 ).collect();
  Ok(Tensor::new(&[height as usize, width as usize, 1], values))
}
