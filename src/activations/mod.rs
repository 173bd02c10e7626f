use serde::{Deserialize, Serialize};

/// Number of per-node parameter slots carried by every individual.
///
/// Fixed arity keeps the node-parameter store a flat `node_count * 4`
/// array; activations that take fewer parameters ignore the tail slots.
pub const NODE_PARAM_SLOTS: usize = 4;

/// Activation vocabulary. Ids are stable and part of the snapshot format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Activation {
    Linear = 0,
    Tanh = 1,
    Sigmoid = 2,
    Relu = 3,
    /// Negative slope in param slot 0.
    LeakyRelu = 4,
    /// Alpha in param slot 0.
    Elu = 5,
    Softsign = 6,
    Softplus = 7,
    Sin = 8,
    Gaussian = 9,
    Gelu = 10,
}

/// Explicit tanh, clamped so `e^{2x}` cannot overflow into NaN.
///
/// The explicit `(e^{2x}-1)/(e^{2x}+1)` form is used instead of `f32::tanh`
/// so CPU and any future accelerator backend agree bit-for-bit.
#[inline]
fn tanh_explicit(x: f32) -> f32 {
    if x > 20.0 {
        return 1.0;
    }
    if x < -20.0 {
        return -1.0;
    }
    let e2x = (2.0 * x).exp();
    (e2x - 1.0) / (e2x + 1.0)
}

impl Activation {
    pub const ALL: [Activation; 11] = [
        Activation::Linear,
        Activation::Tanh,
        Activation::Sigmoid,
        Activation::Relu,
        Activation::LeakyRelu,
        Activation::Elu,
        Activation::Softsign,
        Activation::Softplus,
        Activation::Sin,
        Activation::Gaussian,
        Activation::Gelu,
    ];

    /// How many of the node's parameter slots this activation reads.
    pub fn param_arity(self) -> usize {
        match self {
            Activation::LeakyRelu | Activation::Elu => 1,
            _ => 0,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Apply the activation to a pre-activation value.
    ///
    /// `params` is the node's parameter slice (at least
    /// [`NODE_PARAM_SLOTS`] long); only the arity prefix is read.
    #[inline]
    pub fn apply(self, x: f32, params: &[f32]) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Tanh => tanh_explicit(x),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Relu => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    params[0] * x
                }
            }
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    params[0] * (x.exp() - 1.0)
                }
            }
            Activation::Softsign => x / (1.0 + x.abs()),
            Activation::Softplus => {
                // Clamp: ln(1+e^x) -> x for large x, -> 0 for very negative x.
                if x > 20.0 {
                    x
                } else if x < -20.0 {
                    0.0
                } else {
                    (1.0 + x.exp()).ln()
                }
            }
            Activation::Sin => x.sin(),
            Activation::Gaussian => (-(x * x)).exp(),
            Activation::Gelu => {
                const SQRT_2_OVER_PI: f32 = 0.797_884_6;
                let inner = SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x);
                0.5 * x * (1.0 + tanh_explicit(inner))
            }
        }
    }
}
