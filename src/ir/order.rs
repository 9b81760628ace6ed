//! Shapes, dimension orders and linear index math.
//!
//! Shapes are always four-dimensional and stored in the internal
//! width, height, channel, batch convention. An [`Order`] lists the
//! dimensions from innermost (fastest varying) to outermost.

/// Width dimension index.
pub const DIM_W: usize = 0;
/// Height dimension index.
pub const DIM_H: usize = 1;
/// Channel dimension index.
pub const DIM_C: usize = 2;
/// Batch dimension index.
pub const DIM_N: usize = 3;

/// Four-dimensional shape in W, H, C, N order.
pub type Shape = [usize; 4];

/// Memory layout of a four-dimensional tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Order {
    contiguity: [usize; 4],
}

impl Order {
    /// Channel innermost (NHWC), the layout DPU activations use.
    pub const Z_MAJOR: Order = Order { contiguity: [DIM_C, DIM_W, DIM_H, DIM_N] };
    /// Width innermost (NCHW).
    pub const CHANNEL_MAJOR: Order = Order { contiguity: [DIM_W, DIM_H, DIM_C, DIM_N] };

    /// Build an order from innermost-to-outermost dimension indices.
    ///
    /// Returns `None` unless `contiguity` is a permutation of `0..4`.
    pub fn new(contiguity: [usize; 4]) -> Option<Order> {
        let mut seen = [false; 4];
        for &d in &contiguity {
            if d >= 4 || seen[d] {
                return None;
            }
            seen[d] = true;
        }
        Some(Order { contiguity })
    }

    pub fn contiguity(&self) -> [usize; 4] {
        self.contiguity
    }

    /// Strides in elements, indexed by dimension.
    pub fn element_strides(&self, shape: &Shape) -> [u64; 4] {
        let mut strides = [0u64; 4];
        let mut acc = 1u64;
        for &dim in &self.contiguity {
            strides[dim] = acc;
            acc *= shape[dim] as u64;
        }
        strides
    }

    /// Strides in bytes, indexed by dimension.
    pub fn byte_strides(&self, shape: &Shape, elem_bytes: u64) -> [u64; 4] {
        let mut strides = self.element_strides(shape);
        for s in strides.iter_mut() {
            *s *= elem_bytes;
        }
        strides
    }

    /// Linear element index of `coords` inside a tensor of `shape`.
    pub fn sub_to_ind(&self, shape: &Shape, coords: &Shape) -> u64 {
        let strides = self.element_strides(shape);
        coords
            .iter()
            .zip(strides.iter())
            .map(|(&c, &s)| c as u64 * s)
            .sum()
    }

    /// Inverse of [`Order::sub_to_ind`].
    pub fn ind_to_sub(&self, shape: &Shape, index: u64) -> Shape {
        let mut coords = [0usize; 4];
        let mut rest = index;
        for &dim in &self.contiguity {
            let extent = shape[dim].max(1) as u64;
            coords[dim] = (rest % extent) as usize;
            rest /= extent;
        }
        coords
    }
}

/// Number of elements in a shape.
pub fn element_count(shape: &Shape) -> usize {
    shape.iter().product()
}

/// Round `value` up to a multiple of `multiple`.
pub fn round_up(value: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}
