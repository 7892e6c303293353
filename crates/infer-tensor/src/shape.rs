use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a non-empty vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    ///
    /// # Errors
    /// Returns `TensorError::EmptyShape` if `dims` is empty, and
    /// `ElementCountOverflow` if their product does not fit in `usize`.
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.is_empty() {
            return Err(TensorError::EmptyShape);
        }
        if checked_numel(&dims).is_none() {
            return Err(TensorError::ElementCountOverflow(dims));
        }
        Ok(Shape { dims })
    }

    /// Create a shape from a slice of dimensions.
    pub fn from_slice(dims: &[usize]) -> Result<Self> {
        Shape::new(dims.to_vec())
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    ///
    /// Construction guarantees the product fits.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Number of elements covered by one index of the leading dimension.
    pub fn row_len(&self) -> usize {
        self.strides()[0]
    }

    /// Shape of a single slice along the leading dimension.
    ///
    /// A 1-D shape `[n]` slices into `[1]`.
    pub fn sliced(&self) -> Shape {
        if self.dims.len() == 1 {
            Shape { dims: vec![1] }
        } else {
            Shape {
                dims: self.dims[1..].to_vec(),
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl TryFrom<Vec<usize>> for Shape {
    type Error = TensorError;

    fn try_from(dims: Vec<usize>) -> Result<Self> {
        Shape::new(dims)
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = TensorError;

    fn try_from(dims: &[usize]) -> Result<Self> {
        Shape::from_slice(dims)
    }
}

/// Product of `dims`, or `None` on overflow.
pub fn checked_numel(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(0), 2);
        assert_eq!(s.dim(1), 3);
        assert_eq!(s.dim(2), 4);
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.row_len(), 12);
    }

    #[test]
    fn test_empty_shape_rejected() {
        assert!(matches!(Shape::new(vec![]), Err(TensorError::EmptyShape)));
        assert!(Shape::try_from(&[][..]).is_err());
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        assert!(matches!(
            Shape::new(vec![1 << 40, 1 << 40]),
            Err(TensorError::ElementCountOverflow(_))
        ));
        assert_eq!(checked_numel(&[usize::MAX, 2]), None);
        assert_eq!(checked_numel(&[3, 0, 5]), Some(0));
    }

    #[test]
    fn test_sliced() {
        let s = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(s.sliced().dims(), &[3, 4]);

        let v = Shape::new(vec![5]).unwrap();
        assert_eq!(v.sliced().dims(), &[1]);
        assert_eq!(v.row_len(), 1);
    }

    #[test]
    fn test_display() {
        let s = Shape::new(vec![2, 3]).unwrap();
        assert_eq!(s.to_string(), "[2, 3]");
    }
}
