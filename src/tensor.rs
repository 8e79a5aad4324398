use std::fmt::Debug;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use serde::{Serialize, Deserialize, Serializer, Deserializer, de::Error as _};

mod cops;
mod lops;

pub(crate) use cops::{conv2d_backward, conv_transpose2d_backward};

use crate::{
  internal::*,
  shape::{Shape, ShapeIterator},
  variable::Variable,
  scalar::{ Inner, Numeric, Real },
};


/// Multidimensional array.
///
/// Tensors may contain any type that satisfies [Inner], but
/// additional methods are available for [Numeric] and [Real]
/// inner types. Cloning a tensor is cheap and shares its storage.
///
/// [Real] tensor types can be wrapped in a [Variable] by
/// calling [tracked](Tensor::tracked) or [trained](Tensor::trained).

#[derive(Debug, Clone)]
pub struct Tensor<T: Inner> {
  shape: Shape,
  data: RcT<RcCell<Vec<T>>>,
}

impl<T: Inner> PartialEq for Tensor<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.shape.dims == rhs.shape.dims && self.to_vec() == rhs.to_vec()
  }
}

impl<T: Inner> Tensor<T> {
  pub fn from_shape(shape: Shape, data: Vec<T>) -> Self {
    assert_eq!(shape.size(), data.len(),
      "{} doesn't match data length {}", shape, data.len());
    Self { shape, data: RcT::new(RcCell::new(data)) }
  }

  pub fn new(shape: &[usize], data: Vec<T>) -> Self {
    Self::from_shape(Shape::new(shape), data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::new(&[vec.len()], vec.to_vec())
  }

  pub fn scalar(item: T) -> Self {
    Self::new(&[], vec![item])
  }

  pub fn fill(shape: &[usize], filler: T) -> Self {
    Self::new(shape, vec![filler; shape.iter().product()])
  }

  /// Stack equally shaped tensors along a new leading dimension.

  pub fn rows(rows: &[Tensor<T>]) -> Self {
    assert!(!rows.is_empty(), "Cannot stack zero tensors");
    let mut dims = rows[0].shape.dims.clone();
    assert!(rows.iter().all(|row| row.shape.dims == dims),
      "Stacked tensors must share one shape");
    dims.insert(0, rows.len());
    let data = rows.iter()
      .flat_map(|row| row.to_vec() )
      .collect();
    Self::new(&dims, data)
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  /// Raw storage. Only laid out in logical order for [contiguous](Self::contiguous) tensors.

  pub fn raw(&self) -> RwLockReadGuard<'_, Vec<T>> {
    self.data.read()
  }

  pub(crate) fn raw_mut(&self) -> RwLockWriteGuard<'_, Vec<T>> {
    self.data.write()
  }

  pub fn to_vec(&self) -> Vec<T> {
    self.param_iter().collect()
  }

  pub fn into_raw(self) -> Vec<T> {
    if !self.is_packed() { return self.to_vec() }
    match RcT::try_unwrap(self.data) {
      Ok(cell) => cell.into_inner(),
      Err(data) => data.read().clone(),
    }
  }

  // Storage holds exactly this tensor's elements, in order
  fn is_packed(&self) -> bool {
    self.shape.contiguous() && self.shape.offset == 0 && self.data.read().len() == self.size()
  }

  pub fn shared_with(&self, other: &Self) -> bool {
    RcT::ptr_eq(&self.data, &other.data)
  }

  pub fn detach(&self) -> Self {
    Self::new(&self.shape.dims, self.to_vec())
  }

  /// A tensor whose raw storage holds exactly its elements in logical order.

  pub fn contiguous(&self) -> Self {
    if self.is_packed() {
      self.clone()
    } else {
      self.detach()
    }
  }

  /// Overwrite this tensor's elements in place with those of `other`.

  pub fn assign(&self, other: &Self) {
    assert!(self.shape.dims == other.shape.dims,
      "Could not assign {} tensor to {} tensor", other.shape, self.shape);
    // Avoid clashing locks when tensors share storage
    let other = if self.shared_with(other) { other.detach() } else { other.clone() };
    let values = other.to_vec();
    let mut data = self.data.write();
    for (i, value) in self.shape.iter().zip(values) {
      data[i] = value;
    }
  }

  pub fn zip<O,F>(&self, rhs: &Self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: Fn((T, T)) -> O,
  {
    let lhs = self.broadcast(&rhs.shape);
    let rhs = rhs.broadcast(&lhs.shape);
    let data: Vec<O> = lhs.param_iter()
      .zip(rhs.param_iter())
      .map(cb)
      .collect();
    Tensor::new(&lhs.shape.dims, data)
  }

  pub fn vectorize<O,F>(&self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T) -> O,
  {
    let data = self.param_iter().map(cb).collect();
    Tensor::new(&self.shape.dims, data)
  }

  pub fn param_iter(&self) -> TensorIterator<'_, T> {
    TensorIterator::new(self)
  }

  /// Select one entry along the first dimension.

  pub fn at(&self, index: usize) -> Self {
    assert!(self.rank() > 0 && index < self.shape.dims[0],
      "Index {} out of bounds for {}", index, self.shape);
    let shape = Shape {
      dims: self.shape.dims[1..].to_vec(),
      strides: self.shape.strides[1..].to_vec(),
      offset: (self.shape.offset as isize + index as isize * self.shape.strides[0]) as usize,
    };
    Self { shape, data: self.data.clone() }
  }

  pub fn item(&self) -> T {
    assert!(self.size() == 1,
      "Can't extract item from non-scalar {}", self.shape);
    self.raw()[self.shape.offset]
  }

  pub fn reshape(&self, dims: &[usize]) -> Self {
    let this = self.contiguous();
    let shape = this.shape.view(dims);
    Self { shape, data: this.data }
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Self {
    let shape = self.shape.transpose(dim1, dim2);
    Self { shape, data: self.data.clone() }
  }

  pub fn broadcast(&self, shape: &Shape) -> Self {
    Self {
      shape: self.shape.broadcast(shape),
      data: self.data.clone(),
    }
  }
}

impl<T: Numeric> Tensor<T> {
  pub fn ones(shape: &[usize]) -> Self {
    Self::fill(shape, T::one())
  }

  pub fn zeros(shape: &[usize]) -> Self {
    Self::fill(shape, T::zero())
  }

  #[cfg(test)]
  pub fn arrange(shape: &[usize], start: T, step: T) -> Self {
    let mut value = start;
    Self::new(shape, (0..shape.iter().product())
      .map(|_| { let out = value; value += step; out })
      .collect())
  }

  pub fn add(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a * b )
  }

  pub fn div(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a / b )
  }

  /// Sum of all elements.

  pub fn total(&self) -> T {
    self.param_iter().sum()
  }

  /// Sum a broadcasted tensor back down to `dims`.

  pub fn sum_to(&self, dims: &[usize]) -> Self {
    if self.shape.dims == dims { return self.clone() }
    let target = Shape::new(dims).broadcast(&self.shape);
    assert!(target.dims == self.shape.dims,
      "Cannot sum {} down to {:?}", self.shape, dims);
    let mut out = vec![T::zero(); dims.iter().product()];
    for (i, value) in target.iter().zip(self.param_iter()) {
      out[i] += value;
    }
    Self::new(dims, out)
  }

  /// Add `other` into this tensor's elements in place.

  pub(crate) fn accumulate(&self, other: &Self) {
    assert!(self.shape.dims == other.shape.dims,
      "Could not accumulate {} into {}", other.shape, self.shape);
    let other = if self.shared_with(other) { other.detach() } else { other.clone() };
    let values = other.to_vec();
    let mut data = self.data.write();
    for (i, value) in self.shape.iter().zip(values) {
      data[i] += value;
    }
  }

  pub(crate) fn refill(&self, filler: T) {
    let mut data = self.data.write();
    for i in self.shape.iter() {
      data[i] = filler;
    }
  }
}

impl<T: Real> Tensor<T> {
  /// Uniform samples from `[0, 1)`.

  pub fn rand(shape: &[usize], rng: &mut impl Rng) -> Self {
    let data = (0..shape.iter().product())
      .map(|_| rng.gen_range(T::zero(), T::one()) )
      .collect();
    Self::new(shape, data)
  }

  /// Standard normal samples.

  pub fn randn(shape: &[usize], rng: &mut impl Rng) -> Self {
    let len: usize = shape.iter().product();
    let mut data = Vec::with_capacity(len + 1);
    while data.len() < len {
      let (r1, r2): (T, T) = randn(rng);
      data.push(r1);
      data.push(r2);
    }
    data.truncate(len);
    Self::new(shape, data)
  }

  /// Glorot (Xavier) uniform initialization.

  pub fn glorot_uniform(shape: &[usize], fan_in: usize, fan_out: usize, rng: &mut impl Rng) -> Self {
    let limit = T::lit((6.0 / (fan_in + fan_out) as f64).sqrt());
    Self::rand(shape, rng).vectorize(|a| (a * T::lit(2.0) - T::one()) * limit )
  }

  /// Zeros and ones, where ones occur with probability `keep`.

  pub fn bernoulli(shape: &[usize], keep: T, rng: &mut impl Rng) -> Self {
    Self::rand(shape, rng).vectorize(|a| if a < keep { T::one() } else { T::zero() })
  }

  pub fn all_finite(&self) -> bool {
    self.param_iter().all(|a| a.is_finite() )
  }

  pub fn trained(&self) -> Variable<T> {
    Variable::from_tensor(self.detach(), true)
  }

  pub fn tracked(&self) -> Variable<T> {
    Variable::from_tensor(self.clone(), false)
  }
}

impl<T: Inner + Serialize> Serialize for Tensor<T> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    TensorDump { dims: self.shape.dims.clone(), data: self.to_vec() }.serialize(serializer)
  }
}

impl<'de, T: Inner + Deserialize<'de>> Deserialize<'de> for Tensor<T> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let dump = TensorDump::<T>::deserialize(deserializer)?;
    let size: usize = dump.dims.iter().product();
    if size != dump.data.len() {
      return Err(D::Error::custom(format!(
        "Tensor of {:?} holds {} values", dump.dims, dump.data.len())))
    }
    Ok(Tensor::new(&dump.dims, dump.data))
  }
}

#[derive(Serialize, Deserialize)]
struct TensorDump<T> {
  dims: Vec<usize>,
  data: Vec<T>,
}

impl<T: Inner> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.shape.dims)?;
    print_chunks(0, &self.shape.dims, &self.to_vec(), f)
  }
}

fn print_chunks<T: Debug>(idx: usize, dims: &[usize], vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = "  ".repeat(idx);
  if dims.is_empty() {
    write!(f, "{indent}{:?}", vec[0])?;
  } else if idx == dims.len() - 1 {
    writeln!(f, "{indent}{:?}", vec)?;
  } else {
    writeln!(f, "{indent}[")?;
    for chunk in vec.chunks((vec.len() / dims[idx]).max(1)) {
      print_chunks(idx + 1, dims, chunk, f)?;
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}


pub struct TensorIterator<'a, T: Inner> {
  data: RwLockReadGuard<'a, Vec<T>>,
  shape_iter: ShapeIterator<'a>,
}

impl<'a, T: Inner> TensorIterator<'a, T> {
  fn new(tensor: &'a Tensor<T>) -> Self {
    Self {
      data: tensor.data.read(),
      shape_iter: tensor.shape.iter(),
    }
  }
}

impl<T: Inner> Iterator for TensorIterator<'_, T> {
  type Item = T;

  fn next(&mut self) -> Option<Self::Item> {
    self.shape_iter.next().map(|i| self.data[i] )
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};

  #[test]
  fn index() {
    let x = Tensor::new(&[2,2,2], vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(x.at(0), Tensor::new(&[2,2], vec![1, 2, 3, 4]));
    assert_eq!(x.at(1).at(1), Tensor::vec(&[7, 8]));
    assert_eq!(x.at(0).at(1).at(1).item(), 4);
  }

  #[test]
  fn broadcast() {
    let x = Tensor::new(&[1,2,3], vec![1, 2, 3, 4, 5, 6]);

    let y = Tensor::new(&[    1], vec![1]);
    assert_eq!(x.add(&y), Tensor::new(&[1,2,3], vec![2, 3, 4, 5, 6, 7]));

    let y = Tensor::new(&[    3], vec![1, 2, 3]);
    assert_eq!(x.add(&y), Tensor::new(&[1,2,3], vec![2, 4, 6, 5, 7, 9]));

    let y = Tensor::new(&[  2,3], vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(x.add(&y), Tensor::new(&[1,2,3], vec![2, 4, 6, 8, 10, 12]));
  }

  #[test]
  fn sum_to() {
    let a = Tensor::arrange(&[3,2,2], 0, 1).sum_to(&[2]);
    assert_eq!(a, Tensor::vec(&[30, 36]));

    let b = Tensor::arrange(&[3,2], 0, 1).sum_to(&[3,1]);
    assert_eq!(b, Tensor::new(&[3,1], vec![1, 5, 9]));

    let c = Tensor::arrange(&[2,2], 1, 1).sum_to(&[]);
    assert_eq!(c.item(), 10);
  }

  #[test]
  fn transposed_copy() {
    let a = Tensor::arrange(&[2,3], 0, 1).transpose(0, 1);
    assert_eq!(a.contiguous().raw().clone(), vec![0, 3, 1, 4, 2, 5]);
    assert_eq!(a.reshape(&[6]), Tensor::vec(&[0, 3, 1, 4, 2, 5]));
  }

  #[test]
  fn assign_view() {
    let a = Tensor::zeros(&[2,2]);
    a.at(1).assign(&Tensor::vec(&[3, 4]));
    assert_eq!(a, Tensor::new(&[2,2], vec![0, 0, 3, 4]));
  }

  #[test]
  fn rows() {
    let a = Tensor::rows(&[Tensor::vec(&[1, 2]), Tensor::vec(&[3, 4])]);
    assert_eq!(a.dims(), &[2, 2]);
    assert_eq!(a.at(1), Tensor::vec(&[3, 4]));
  }

  #[test]
  fn seeded_randn() {
    let a = Tensor::<f32>::randn(&[5], &mut StdRng::seed_from_u64(7));
    let b = Tensor::<f32>::randn(&[5], &mut StdRng::seed_from_u64(7));
    assert_eq!(a, b);
    assert_eq!(a.size(), 5);
  }

  #[test]
  fn glorot_range() {
    let a = Tensor::<f32>::glorot_uniform(&[10, 20], 10, 20, &mut StdRng::seed_from_u64(1));
    let limit = (6.0f32 / 30.0).sqrt();
    assert!(a.param_iter().all(|x| x.abs() <= limit ));
  }

  #[test]
  fn serialize() {
    let a = Tensor::arrange(&[2,3], 0.5f32, 1.0).transpose(0, 1);
    let bytes = postcard::to_allocvec(&a).unwrap();
    let b: Tensor<f32> = postcard::from_bytes(&bytes).unwrap();
    assert_eq!(a, b);
  }
}
