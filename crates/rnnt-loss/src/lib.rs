#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

//! Batched RNN-Transducer loss.
//!
//! Given joint-network logits of shape `[B*H, maxT, maxU, D]` and a batch of
//! reference label sequences, this crate computes the per-sample negative
//! log-likelihood over all monotonic alignments and, optionally, the gradient
//! of that cost with respect to every logit. The forward (alpha) and backward
//! (beta) recursions run in log-space over the `(T, U)` lattice, alpha and
//! beta of each sample in parallel, and the gradient uses the fused
//! log-softmax identity so that no softmax tensor is ever materialized.
//!
//! Alignment restriction windows (built from word-piece end frames) prune the
//! lattice per target position, and a sparse storage mode materializes only
//! the cells inside those windows.
//!
//! Entry points are [`compute`], [`compute_in_place`], [`compute_sparse`],
//! [`compute_sparse_in_place`] and the diagnostic halves [`compute_alphas`]
//! and [`compute_betas`]. All of them are generic over the input logit
//! element (`f16`, `f32` or `f64`) and the accumulator element (`f32` or
//! `f64`) and operate on caller-provided row-major buffers plus a per-call
//! [`Workspace`].

#[macro_use]
extern crate derive_new;

extern crate alloc;

mod compute;
mod element;
mod error;
mod math;
mod options;
mod parallel;
mod restriction;
mod sharing;
mod sparse;
mod workspace;

pub(crate) mod ops;

pub use compute::*;
pub use element::{AccElement, LogitElement};
pub use error::ComputeError;
pub use options::Options;
pub use restriction::AlignmentRestrictionCheck;
pub use sparse::{SampleCells, SparseLayout};
pub use workspace::{Workspace, WorkspaceOffsets};
