use core::fmt::Debug;
use core::ops::AddAssign;

use half::f16;
use libm::{exp, expf, log, log1p, log1pf, logf};
use num_traits::float::FloatCore;

/// An input logit element.
///
/// Logits may arrive in half precision; every read widens through `f64` so a
/// cast to any accumulator type is exact for 16- and 32-bit inputs.
pub trait LogitElement: Copy + Send + Sync + Debug + 'static {
    /// Widen to `f64`.
    fn to_f64(self) -> f64;
    /// Narrow from `f64`.
    fn from_f64(value: f64) -> Self;
}

/// An accumulator element for denominators, log-prob pairs, alphas and betas.
///
/// Always at least 32-bit; `FloatCore` supplies the classification and
/// comparison surface while the transcendentals go through `libm`.
pub trait AccElement: FloatCore + AddAssign + Send + Sync + Debug + 'static {
    /// Widen to `f64`.
    fn to_f64(self) -> f64;
    /// Narrow from `f64`.
    fn from_f64(value: f64) -> Self;
    /// `e^self`.
    fn exp_elem(self) -> Self;
    /// `ln(self)`.
    fn log_elem(self) -> Self;
    /// `ln(1 + self)`.
    fn log1p_elem(self) -> Self;
}

impl LogitElement for f16 {
    #[inline(always)]
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

macro_rules! make_elem {
    (
        single
        $ty:ty
    ) => {
        impl LogitElement for $ty {
            #[inline(always)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }

        impl AccElement for $ty {
            #[inline(always)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            #[inline(always)]
            fn exp_elem(self) -> Self {
                expf(self)
            }

            #[inline(always)]
            fn log_elem(self) -> Self {
                logf(self)
            }

            #[inline(always)]
            fn log1p_elem(self) -> Self {
                log1pf(self)
            }
        }
    };
    (
        double
        $ty:ty
    ) => {
        impl LogitElement for $ty {
            #[inline(always)]
            fn to_f64(self) -> f64 {
                self
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                value
            }
        }

        impl AccElement for $ty {
            #[inline(always)]
            fn to_f64(self) -> f64 {
                self
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                value
            }

            #[inline(always)]
            fn exp_elem(self) -> Self {
                exp(self)
            }

            #[inline(always)]
            fn log_elem(self) -> Self {
                log(self)
            }

            #[inline(always)]
            fn log1p_elem(self) -> Self {
                log1p(self)
            }
        }
    };
}

make_elem!(single f32);
make_elem!(double f64);

/// Cast a logit to the accumulator type.
#[inline(always)]
pub(crate) fn cast<L: LogitElement, A: AccElement>(value: L) -> A {
    A::from_f64(value.to_f64())
}
