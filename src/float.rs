use std::fmt::{Debug, Display, LowerExp};

use num_traits::{Float as NumFloat, FromPrimitive};

/// Marker trait for base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and formatting traits needed throughout the solver.
pub trait Float:
    NumFloat + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + LowerExp + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}
