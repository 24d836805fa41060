//! Flat `f32` matrix with 1D/2D/3D addressing.
//!
//! Extents are stored as `[x, y, z]`; unused trailing extents are zero.
//! Data is row-major: in 2D the element `(i, j)` lives at `i * y + j`, in 3D
//! `(i, j, k)` lives at `(i * y + j) * z + k`.

use std::fmt;

use crate::error::{MatrixError, Result};

/// Largest element count a single matrix may hold (4 GiB of `f32`).
pub const MAX_ELEMENTS: usize = 1_073_741_824;

/// Bytes per element.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// Dimensionality of an [`IndexMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatrixMode {
    Matrix1D = 1,
    Matrix2D = 2,
    Matrix3D = 3,
}

impl MatrixMode {
    pub const fn rank(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MatrixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.rank())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatrix {
    data: Vec<f32>,
    mode: MatrixMode,
    dims: [usize; 3],
}

impl IndexMatrix {
    /// An empty matrix of the given mode. Call [`IndexMatrix::alloc`] before use.
    pub const fn new(mode: MatrixMode) -> Self {
        Self {
            data: Vec::new(),
            mode,
            dims: [0; 3],
        }
    }

    /// Allocate a zeroed 2D matrix of `width × height`.
    pub fn zeros_2d(width: usize, height: usize) -> Result<Self> {
        let mut matrix = Self::new(MatrixMode::Matrix2D);
        matrix.alloc(width, height, 0)?;
        Ok(matrix)
    }

    /// Allocate a 2D matrix with every element set to `value`.
    pub fn filled_2d(width: usize, height: usize, value: f32) -> Result<Self> {
        let mut matrix = Self::zeros_2d(width, height)?;
        matrix.fill(value);
        Ok(matrix)
    }

    /// Wrap existing data as a matrix, checking its length against the extents.
    pub fn from_vec(mode: MatrixMode, dims: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let dims = mask_dims(mode, dims);
        validate_dims(mode, dims)?;
        let expected = element_count(mode, dims)?;
        if data.len() != expected {
            return Err(MatrixError::SizeMismatch {
                expected: expected * ELEMENT_SIZE,
                actual: data.len() * ELEMENT_SIZE,
            });
        }
        Ok(Self { data, mode, dims })
    }

    /// (Re)allocate storage as zeroed elements. Extents beyond the matrix's
    /// rank are ignored.
    ///
    /// Fails without touching the current contents when a leading extent is
    /// zero but a trailing one is not, or when the element count exceeds
    /// [`MAX_ELEMENTS`].
    pub fn alloc(&mut self, dimx: usize, dimy: usize, dimz: usize) -> Result<()> {
        let dims = mask_dims(self.mode, [dimx, dimy, dimz]);
        validate_dims(self.mode, dims)?;
        let len = element_count(self.mode, dims)?;

        self.data.clear();
        self.data.resize(len, 0.0);
        self.dims = dims;
        Ok(())
    }

    /// Release storage and clear the extents. Returns the number of bytes freed.
    pub fn free(&mut self) -> usize {
        let released = self.size_bytes();
        self.data = Vec::new();
        self.dims = [0; 3];
        released
    }

    pub fn mode(&self) -> MatrixMode {
        self.mode
    }

    /// Extent along axis `index` (0 = x, 1 = y, 2 = z). Indices above 2 read z.
    pub fn dim(&self, index: usize) -> usize {
        self.dims[index.min(2)]
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len() * ELEMENT_SIZE
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Raw native-endian bytes of the element buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Element `i` of a 1D matrix.
    pub fn get_1d(&self, i: usize) -> Option<f32> {
        self.index_1d(i).map(|idx| self.data[idx])
    }

    pub fn get_1d_mut(&mut self, i: usize) -> Option<&mut f32> {
        self.index_1d(i).map(move |idx| &mut self.data[idx])
    }

    /// Element `(i, j)` of a 2D matrix.
    pub fn get_2d(&self, i: usize, j: usize) -> Option<f32> {
        self.index_2d(i, j).map(|idx| self.data[idx])
    }

    pub fn get_2d_mut(&mut self, i: usize, j: usize) -> Option<&mut f32> {
        self.index_2d(i, j).map(move |idx| &mut self.data[idx])
    }

    /// Element `(i, j, k)` of a 3D matrix.
    pub fn get_3d(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        self.index_3d(i, j, k).map(|idx| self.data[idx])
    }

    pub fn get_3d_mut(&mut self, i: usize, j: usize, k: usize) -> Option<&mut f32> {
        self.index_3d(i, j, k).map(move |idx| &mut self.data[idx])
    }

    fn index_1d(&self, i: usize) -> Option<usize> {
        (self.mode == MatrixMode::Matrix1D && i < self.dims[0]).then_some(i)
    }

    fn index_2d(&self, i: usize, j: usize) -> Option<usize> {
        let [x, y, _] = self.dims;
        (self.mode == MatrixMode::Matrix2D && i < x && j < y).then(|| i * y + j)
    }

    fn index_3d(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        let [x, y, z] = self.dims;
        (self.mode == MatrixMode::Matrix3D && i < x && j < y && k < z).then(|| (i * y + j) * z + k)
    }

    /// Collapse to a lower rank without moving data.
    ///
    /// 3D→2D folds `[x, y, z]` into `[x, y·z]`; 2D→1D and 3D→1D fold every
    /// extent into `[x·y(·z)]`.
    pub fn reduce(&mut self, target: MatrixMode) -> Result<()> {
        if target >= self.mode {
            return Err(MatrixError::InvalidConversion {
                from: self.mode,
                to: target,
                direction: "reduction",
            });
        }

        let [x, y, z] = self.dims;
        let dims = match (self.mode, target) {
            (MatrixMode::Matrix3D, MatrixMode::Matrix2D) => [x, y * z, 0],
            (MatrixMode::Matrix2D, MatrixMode::Matrix1D) => [x * y, 0, 0],
            _ => [x * y * z, 0, 0],
        };
        self.check_covers(target, dims)?;
        self.mode = target;
        self.dims = dims;
        Ok(())
    }

    /// Split into a higher rank without moving data.
    ///
    /// 1D→2D needs `x == X·Y`. 2D→3D keeps `x` and needs `y == Y·Z`.
    /// 1D→3D needs `x == X·Y·Z`.
    pub fn expand(&mut self, target: MatrixMode, dims: [usize; 3]) -> Result<()> {
        if target <= self.mode {
            return Err(MatrixError::InvalidConversion {
                from: self.mode,
                to: target,
                direction: "expansion",
            });
        }

        let dims = mask_dims(target, dims);
        let [x, y, _] = self.dims;
        let fits = match (self.mode, target) {
            (MatrixMode::Matrix1D, MatrixMode::Matrix2D) => x == dims[0] * dims[1],
            (MatrixMode::Matrix2D, MatrixMode::Matrix3D) => x == dims[0] && y == dims[1] * dims[2],
            _ => x == dims[0] * dims[1] * dims[2],
        };
        if !fits {
            return Err(self.shape_mismatch(target, dims));
        }
        self.check_covers(target, dims)?;
        self.mode = target;
        self.dims = dims;
        Ok(())
    }

    fn check_covers(&self, target: MatrixMode, dims: [usize; 3]) -> Result<()> {
        match element_count(target, dims) {
            Ok(len) if len == self.data.len() => Ok(()),
            _ => Err(self.shape_mismatch(target, dims)),
        }
    }

    fn shape_mismatch(&self, target: MatrixMode, dims: [usize; 3]) -> MatrixError {
        MatrixError::ShapeMismatch {
            from: self.mode,
            from_dims: self.dims,
            to: target,
            to_dims: dims,
        }
    }
}

fn mask_dims(mode: MatrixMode, dims: [usize; 3]) -> [usize; 3] {
    match mode {
        MatrixMode::Matrix1D => [dims[0], 0, 0],
        MatrixMode::Matrix2D => [dims[0], dims[1], 0],
        MatrixMode::Matrix3D => dims,
    }
}

fn validate_dims(mode: MatrixMode, dims: [usize; 3]) -> Result<()> {
    let [x, y, z] = dims;
    let invalid = match mode {
        MatrixMode::Matrix1D => false,
        MatrixMode::Matrix2D => x == 0 && y > 0,
        MatrixMode::Matrix3D => (x == 0 && y > 0) || (y == 0 && z > 0),
    };
    if invalid {
        return Err(MatrixError::ZeroLeadingDimension { dims });
    }
    Ok(())
}

fn element_count(mode: MatrixMode, dims: [usize; 3]) -> Result<usize> {
    let requested: u128 = dims[..mode.rank()].iter().map(|&d| d as u128).product();
    if requested > MAX_ELEMENTS as u128 {
        return Err(MatrixError::AllocationTooLarge {
            requested,
            limit: MAX_ELEMENTS,
        });
    }
    Ok(requested as usize)
}
