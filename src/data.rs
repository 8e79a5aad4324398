use std::{
  collections::HashMap,
  fs,
  path::{ Path, PathBuf },
};

use rand::{ Rng, rngs::StdRng, seq::SliceRandom };
use tracing::debug;

use crate::{
  codec,
  error::{ GanError, Result },
  gan::{ Batches, BatchSource },
  Tensor,
};


/// `len` values drawn uniformly from `[-1, 1)`.

pub fn generate_random_parameters(len: usize, rng: &mut impl Rng) -> Vec<f32> {
  (0..len).map(|_| rng.gen_range(-1.0, 1.0) ).collect()
}


/// Training images listed in a CSV index.
///
/// The index starts with a header row whose first column is `gif_id`.
/// Every following row names an image, stored as `<images>/<id>.gif`,
/// followed by the parameters that describe it.

#[derive(Debug)]
pub struct GifDataset {
  ids: Vec<String>,
  parameters: HashMap<String, Vec<f32>>,
  images: PathBuf,
  batch_size: usize,
  shuffle: Option<StdRng>,
}

impl GifDataset {
  pub fn open(index: &Path, images: impl Into<PathBuf>, batch_size: usize) -> Result<Self> {
    if batch_size == 0 {
      return Err(GanError::Config("batch_size must be greater than 0".into()))
    }
    let content = fs::read_to_string(index)
      .map_err(|e| GanError::Data(format!("Failed to read {}: {}", index.display(), e)) )?;
    let (ids, parameters) = parse_index(&content)?;
    debug!(rows = ids.len(), index = %index.display(), "Read dataset index");
    Ok(Self { ids, parameters, images: images.into(), batch_size, shuffle: None })
  }

  /// Visit images in a fresh random order every epoch.

  pub fn shuffled(mut self, rng: StdRng) -> Self {
    self.shuffle = Some(rng);
    self
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  pub fn ids(&self) -> &[String] {
    &self.ids
  }

  pub fn parameters(&self, id: &str) -> Option<&[f32]> {
    self.parameters.get(id).map(Vec::as_slice)
  }

  /// Image `id` as `[height, width, 1]` in `[0, 1]`.

  pub fn image(&self, id: &str) -> Result<Tensor<f32>> {
    codec::load_image(&self.images.join(format!("{id}.gif")))
  }

  /// Full batches of images, rescaled to `[-1, 1]` to match generator output.
  /// A trailing partial batch is dropped. Images are decoded one batch at a time.

  pub fn batches(&mut self) -> Batches<'_> {
    let mut order = self.ids.clone();
    if let Some(rng) = &mut self.shuffle {
      order.shuffle(rng);
    }
    let this = &*self;
    let size = this.batch_size;
    Box::new((0..order.len() / size).map(move |batch| this.load_batch(&order[batch * size..(batch + 1) * size]) ))
  }

  fn load_batch(&self, ids: &[String]) -> Result<Tensor<f32>> {
    let images = ids.iter()
      .map(|id| self.image(id) )
      .collect::<Result<Vec<_>>>()?;
    check_uniform(&images)?;
    Ok(Tensor::rows(&images).vectorize(|a| a * 2.0 - 1.0 ))
  }
}

impl BatchSource for GifDataset {
  fn epoch(&mut self, _epoch: usize) -> Result<Batches<'_>> {
    Ok(self.batches())
  }
}

fn check_uniform(images: &[Tensor<f32>]) -> Result<()> {
  let first = images[0].dims();
  match images.iter().find(|image| image.dims() != first ) {
    Some(image) => Err(GanError::Data(format!(
      "images of differing shapes {:?} and {:?} in one batch", first, image.dims()))),
    None => Ok(()),
  }
}

type Index = (Vec<String>, HashMap<String, Vec<f32>>);

fn parse_index(content: &str) -> Result<Index> {
  let mut lines = content.lines()
    .enumerate()
    .filter(|(_, line)| !line.trim().is_empty() );
  match lines.next() {
    Some((_, header)) if header.split(',').next().map(str::trim) == Some("gif_id") => {},
    _ => return Err(GanError::Data("index must start with a header beginning with gif_id".into())),
  }

  let mut ids = vec![];
  let mut parameters = HashMap::new();
  for (number, line) in lines {
    let mut fields = line.split(',').map(str::trim);
    let id = fields.next().unwrap_or_default().to_string();
    if id.is_empty() {
      return Err(GanError::Data(format!("line {}: missing gif_id", number + 1)))
    }
    let values = fields
      .map(|field| field.parse::<f32>()
        .map_err(|e| GanError::Data(format!("line {}: {:?} is not a number: {}", number + 1, field, e)) ))
      .collect::<Result<Vec<_>>>()?;
    if parameters.insert(id.clone(), values).is_some() {
      return Err(GanError::Data(format!("line {}: duplicate gif_id {}", number + 1, id)))
    }
    ids.push(id);
  }
  Ok((ids, parameters))
}
