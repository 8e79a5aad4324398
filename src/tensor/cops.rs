#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
  tensor::Tensor,
  scalar::{ Numeric, Real },
};


/// Row-major product of an `[m, k]` and a `[k, n]` matrix.
///
/// With `ta`/`tb` set, the respective operand is stored transposed,
/// i.e. as `[k, m]` or `[n, k]`.

pub(crate) fn gemm<T: Real>(m: usize, k: usize, n: usize, a: &[T], ta: bool, b: &[T], tb: bool) -> Vec<T> {
  let a_strides = if ta { (1, m as isize) } else { (k as isize, 1) };
  let b_strides = if tb { (1, k as isize) } else { (n as isize, 1) };
  let mut c = vec![T::zero(); m * n];
  T::gemm(m, k, n, a, a_strides, b, b_strides, &mut c);
  c
}


/// Sliding window geometry of a 2-D convolution over NHWC images
/// with "same" padding.
///
/// `height`, `width` and `channels` describe the sampled (larger) image,
/// `out_height` and `out_width` the grid of window positions.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
  pub kernel: usize,
  pub stride: usize,
  pub out_height: usize,
  pub out_width: usize,
  pad_top: usize,
  pad_left: usize,
}

impl Window {
  pub fn same(batch: usize, height: usize, width: usize, channels: usize, kernel: usize, stride: usize) -> Self {
    assert!(stride > 0 && kernel > 0, "Kernel and stride must be positive");
    let out_height = (height + stride - 1) / stride;
    let out_width = (width + stride - 1) / stride;
    let pad = |size: usize, out: usize| ((out - 1) * stride + kernel).saturating_sub(size) / 2;
    Self {
      batch, height, width, channels, kernel, stride, out_height, out_width,
      pad_top: pad(height, out_height),
      pad_left: pad(width, out_width),
    }
  }

  /// Length of one flattened `[kernel, kernel, channels]` patch.

  pub fn patch_len(&self) -> usize {
    self.kernel * self.kernel * self.channels
  }

  /// Number of window positions across the whole batch.

  pub fn positions(&self) -> usize {
    self.batch * self.out_height * self.out_width
  }

  fn image_len(&self) -> usize {
    self.height * self.width * self.channels
  }

  // Visit all (patch offset, image offset) pairs of one image that fall inside its bounds
  fn for_each_tap(&self, mut cb: impl FnMut(usize, usize)) {
    let patch_len = self.patch_len();
    for oy in 0..self.out_height {
      for ox in 0..self.out_width {
        let row = (oy * self.out_width + ox) * patch_len;
        for a in 0..self.kernel {
          let y = (oy * self.stride + a) as isize - self.pad_top as isize;
          if y < 0 || y >= self.height as isize { continue }
          for b in 0..self.kernel {
            let x = (ox * self.stride + b) as isize - self.pad_left as isize;
            if x < 0 || x >= self.width as isize { continue }
            let src = (y as usize * self.width + x as usize) * self.channels;
            let dst = row + (a * self.kernel + b) * self.channels;
            cb(dst, src);
          }
        }
      }
    }
  }

  fn gather<T: Numeric>(&self, image: &[T], patches: &mut [T]) {
    let c = self.channels;
    self.for_each_tap(|dst, src| {
      patches[dst..dst + c].copy_from_slice(&image[src..src + c]);
    });
  }

  fn scatter<T: Numeric>(&self, patches: &[T], image: &mut [T]) {
    let c = self.channels;
    self.for_each_tap(|dst, src| {
      for (out, &value) in image[src..src + c].iter_mut().zip(&patches[dst..dst + c]) {
        *out += value;
      }
    });
  }
}

fn per_image<T, F>(buffer: &mut [T], len: usize, cb: F)
where
  T: Numeric,
  F: Fn(usize, &mut [T]) + Send + Sync,
{
  #[cfg(feature = "rayon")]
  buffer.par_chunks_mut(len).enumerate().for_each(|(n, chunk)| cb(n, chunk) );

  #[cfg(not(feature = "rayon"))]
  buffer.chunks_mut(len).enumerate().for_each(|(n, chunk)| cb(n, chunk) );
}

/// Unfold packed NHWC `images` into one row of patch values per window position.

pub(crate) fn im2col<T: Numeric>(images: &[T], window: &Window) -> Vec<T> {
  assert_eq!(images.len(), window.batch * window.image_len());
  let per_image_len = window.out_height * window.out_width * window.patch_len();
  let mut cols = vec![T::zero(); window.batch * per_image_len];
  let image_len = window.image_len();
  per_image(&mut cols, per_image_len, |n, patches| {
    window.gather(&images[n * image_len..(n + 1) * image_len], patches);
  });
  cols
}

/// Fold patch rows back into NHWC images, summing overlapping taps.
/// This is the adjoint of [im2col].

pub(crate) fn col2im<T: Numeric>(cols: &[T], window: &Window) -> Vec<T> {
  let per_image_len = window.out_height * window.out_width * window.patch_len();
  assert_eq!(cols.len(), window.batch * per_image_len);
  let image_len = window.image_len();
  let mut images = vec![T::zero(); window.batch * image_len];
  per_image(&mut images, image_len, |n, image| {
    window.scatter(&cols[n * per_image_len..(n + 1) * per_image_len], image);
  });
  images
}

fn conv_window<T: Real>(input: &Tensor<T>, kernel: &Tensor<T>, stride: usize) -> Window {
  let dims = input.dims();
  let kdims = kernel.dims();
  assert!(dims.len() == 4 && kdims.len() == 4 && kdims[0] == kdims[1] && kdims[2] == dims[3],
    "Cannot convolve {} with kernel {}", input.shape(), kernel.shape());
  Window::same(dims[0], dims[1], dims[2], dims[3], kdims[0], stride)
}

fn transpose_window<T: Real>(input: &Tensor<T>, kernel: &Tensor<T>, stride: usize) -> Window {
  let dims = input.dims();
  let kdims = kernel.dims();
  assert!(dims.len() == 4 && kdims.len() == 4 && kdims[0] == kdims[1] && kdims[3] == dims[3],
    "Cannot transpose-convolve {} with kernel {}", input.shape(), kernel.shape());
  Window::same(dims[0], dims[1] * stride, dims[2] * stride, kdims[2], kdims[0], stride)
}

/// Strided 2-D convolution of NHWC `input` with a `[k, k, in, out]` kernel.

pub(crate) fn conv2d<T: Real>(input: &Tensor<T>, kernel: &Tensor<T>, stride: usize) -> Tensor<T> {
  let window = conv_window(input, kernel, stride);
  let out_channels = kernel.dims()[3];
  let input = input.contiguous();
  let kernel = kernel.contiguous();
  let cols = im2col(&input.raw(), &window);
  let out = gemm(window.positions(), window.patch_len(), out_channels, &cols, false, &kernel.raw(), false);
  Tensor::new(&[window.batch, window.out_height, window.out_width, out_channels], out)
}

/// Gradients of [conv2d] with respect to its input and kernel.

pub(crate) fn conv2d_backward<T: Real>(input: &Tensor<T>, kernel: &Tensor<T>, stride: usize, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
  let window = conv_window(input, kernel, stride);
  let out_channels = kernel.dims()[3];
  let input = input.contiguous();
  let kernel = kernel.contiguous();
  let grad = grad.contiguous();
  let cols = im2col(&input.raw(), &window);
  let (positions, patch) = (window.positions(), window.patch_len());
  let dkernel = gemm(patch, positions, out_channels, &cols, true, &grad.raw(), false);
  let dcols = gemm(positions, out_channels, patch, &grad.raw(), false, &kernel.raw(), true);
  let dinput = col2im(&dcols, &window);
  (Tensor::new(input.dims(), dinput), Tensor::new(kernel.dims(), dkernel))
}

/// Transposed 2-D convolution of NHWC `input` with a `[k, k, out, in]` kernel.
/// Spatial dimensions grow by a factor of `stride`.

pub(crate) fn conv_transpose2d<T: Real>(input: &Tensor<T>, kernel: &Tensor<T>, stride: usize) -> Tensor<T> {
  let window = transpose_window(input, kernel, stride);
  let in_channels = input.dims()[3];
  let input = input.contiguous();
  let kernel = kernel.contiguous();
  let cols = gemm(window.positions(), in_channels, window.patch_len(), &input.raw(), false, &kernel.raw(), true);
  let out = col2im(&cols, &window);
  Tensor::new(&[window.batch, window.height, window.width, window.channels], out)
}

/// Gradients of [conv_transpose2d] with respect to its input and kernel.

pub(crate) fn conv_transpose2d_backward<T: Real>(input: &Tensor<T>, kernel: &Tensor<T>, stride: usize, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
  let window = transpose_window(input, kernel, stride);
  let in_channels = input.dims()[3];
  let input = input.contiguous();
  let kernel = kernel.contiguous();
  let grad = grad.contiguous();
  let dcols = im2col(&grad.raw(), &window);
  let (positions, patch) = (window.positions(), window.patch_len());
  let dinput = gemm(positions, patch, in_channels, &dcols, false, &kernel.raw(), false);
  let dkernel = gemm(patch, positions, in_channels, &dcols, true, &input.raw(), false);
  (Tensor::new(input.dims(), dinput), Tensor::new(kernel.dims(), dkernel))
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_padding() {
    let window = Window::same(1, 28, 28, 1, 5, 2);
    assert_eq!((window.out_height, window.out_width), (14, 14));
    assert_eq!((window.pad_top, window.pad_left), (1, 1));

    let window = Window::same(1, 7, 7, 1, 5, 1);
    assert_eq!(window.out_height, 7);
    assert_eq!(window.pad_top, 2);
  }

  #[test]
  fn unfold() {
    // 1x3x3x1 image, 3x3 kernel, stride 1: center window sees the whole image
    let image: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    let window = Window::same(1, 3, 3, 1, 3, 1);
    let cols = im2col(&image, &window);
    assert_eq!(cols.len(), 9 * 9);
    assert_eq!(&cols[4 * 9..5 * 9], &image[..]);
    // Top left window is padded with zeros
    assert_eq!(&cols[0..9], &[0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 4.0, 5.0]);
  }

  #[test]
  fn fold_is_adjoint() {
    // <im2col(x), y> == <x, col2im(y)>
    let window = Window::same(2, 5, 4, 3, 3, 2);
    let x: Vec<f64> = (0..2 * 5 * 4 * 3).map(|i| (i as f64 * 0.37).sin()).collect();
    let y: Vec<f64> = (0..window.positions() * window.patch_len()).map(|i| (i as f64 * 0.11).cos()).collect();
    let lhs: f64 = im2col(&x, &window).iter().zip(&y).map(|(a, b)| a * b).sum();
    let rhs: f64 = x.iter().zip(col2im(&y, &window)).map(|(a, b)| a * b).sum();
    assert!((lhs - rhs).abs() < 1e-9);
  }

  #[test]
  fn convolve() {
    let input = Tensor::new(&[1, 3, 3, 1], (1..=9).map(|v| v as f32).collect());
    let kernel = Tensor::ones(&[3, 3, 1, 1]);
    let out = conv2d(&input, &kernel, 1);
    assert_eq!(out.dims(), &[1, 3, 3, 1]);
    assert_eq!(out.to_vec(), vec![12.0, 21.0, 16.0, 27.0, 45.0, 33.0, 24.0, 39.0, 28.0]);

    let out = conv2d(&input, &kernel, 2);
    assert_eq!(out.dims(), &[1, 2, 2, 1]);
  }

  #[test]
  fn transposed_upsamples() {
    let input = Tensor::<f32>::ones(&[2, 3, 3, 4]);
    let kernel = Tensor::ones(&[5, 5, 6, 4]);
    let out = conv_transpose2d(&input, &kernel, 2);
    assert_eq!(out.dims(), &[2, 6, 6, 6]);
  }
}
