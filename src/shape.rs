use serde::{Serialize, Deserialize};

use crate::internal::*;


/// The shape of a [Tensor](crate::Tensor).

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
  pub dims: Vec<usize>,
  pub(crate) strides: Vec<isize>,
  pub(crate) offset: usize,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Self {
    Self {
      dims: dims.to_vec(),
      strides: Self::make_strides(dims),
      offset: 0,
    }
  }

  fn make_strides(dims: &[usize]) -> Vec<isize> {
    let mut strides = vec![1; dims.len()];
    for i in (1..dims.len()).rev() {
      strides[i - 1] = dims[i] as isize * strides[i];
    }
    strides
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn contiguous(&self) -> bool {
    self.strides == Self::make_strides(&self.dims)
  }

  /// Storage indices of all elements in logical (row-major) order.

  pub fn iter(&self) -> ShapeIterator<'_> {
    ShapeIterator::new(self)
  }

  /// Reinterpret a contiguous shape with different dimensions.

  pub fn view(&self, dims: &[usize]) -> Self {
    assert!(self.contiguous(), "Cannot view non-contiguous {}", self);
    assert_eq!(self.size(), dims.iter().product::<usize>(),
      "Cannot view {} as {:?}", self, dims);
    Self {
      dims: dims.to_vec(),
      strides: Self::make_strides(dims),
      offset: self.offset,
    }
  }

  /// Expand to the common shape of `self` and `other`, using zero strides
  /// for dimensions that get repeated.

  pub fn broadcast(&self, other: &Self) -> Self {
    let rank = self.rank().max(other.rank());
    let pad_l = rank - self.rank();
    let pad_r = rank - other.rank();
    let mut dims = Vec::with_capacity(rank);
    let mut strides = Vec::with_capacity(rank);
    for d in 0..rank {
      let (dl, stride) = if d < pad_l { (1, 0) } else { (self.dims[d - pad_l], self.strides[d - pad_l]) };
      let dr = if d < pad_r { 1 } else { other.dims[d - pad_r] };
      assert!(dl == dr || dl == 1 || dr == 1, "Could not broadcast {} & {}", self, other);
      dims.push(dl.max(dr));
      strides.push(if dl == 1 && dr != 1 { 0 } else { stride });
    }
    Self { dims, strides, offset: self.offset }
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Self {
    let dim1 = negative_index(dim1, self.rank());
    let dim2 = negative_index(dim2, self.rank());
    let mut shape = self.clone();
    shape.dims.swap(dim1, dim2);
    shape.strides.swap(dim1, dim2);
    shape
  }
}

impl std::ops::Index<isize> for Shape {
  type Output = usize;

  fn index(&self, i: isize) -> &usize {
    &self.dims[negative_index(i, self.rank())]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}


/// Iterate through a [Shape]'s indices.

pub struct ShapeIterator<'a> {
  shape: &'a Shape,
  counter: Vec<usize>,
  idx: isize,
  remaining: usize,
}

impl<'a> ShapeIterator<'a> {
  fn new(shape: &'a Shape) -> Self {
    Self {
      counter: vec![0; shape.rank()],
      idx: shape.offset as isize,
      remaining: shape.size(),
      shape,
    }
  }
}

impl<'a> Iterator for ShapeIterator<'a> {
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 { return None }
    self.remaining -= 1;
    let out = self.idx as usize;
    // Walk backward through dimensions
    for d in (0..self.shape.rank()).rev() {
      self.counter[d] += 1;
      self.idx += self.shape.strides[d];
      if self.counter[d] < self.shape.dims[d] { break }
      // Full turn
      self.counter[d] = 0;
      self.idx -= self.shape.strides[d] * self.shape.dims[d] as isize;
    }
    Some(out)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.remaining, Some(self.remaining))
  }
}
