//! Decomposable aggregation functions.
//!
//! An aggregate over values `v1..vn` is computed as `h(f(g(v1), .., g(vn)))`, where `g`
//! lifts one value into a partial aggregate, `f` combines partial aggregates and `h`
//! turns the final partial into the user-facing result. The tree stores partials in
//! text form inside node contexts, so every [`Aggregator`] also owns the text codec of
//! its values and partials.

use std::fmt;

mod functions;

pub use functions::{Average, Count, HashChain, MaxInt, MinInt, Sum, SumCount};

use crate::types::Result;

/// A decomposable aggregation function `(g, f, h)` with its text codecs.
pub trait Aggregator: Send + Sync + 'static {
    /// Atomic value stored next to each key.
    type Value: Clone + fmt::Debug + Send + Sync;
    /// Partial aggregate stored in aggregate slots.
    type Partial: Clone + fmt::Debug + PartialEq + Send + Sync;
    /// Final result returned to callers.
    type Output: fmt::Debug + PartialEq + Send;

    /// Stable name; stores use it to keep one table per aggregation function.
    fn name(&self) -> &'static str;

    /// `g`: lift a single value.
    fn lift(&self, value: &Self::Value) -> Self::Partial;

    /// `f`: combine partials in sequence order. Must return [`Aggregator::identity`]
    /// for an empty slice.
    fn combine(&self, parts: &[Self::Partial]) -> Self::Partial;

    /// `h`: finalize a partial.
    fn finalize(&self, partial: &Self::Partial) -> Self::Output;

    /// Neutral partial.
    fn identity(&self) -> Self::Partial;

    /// Parse a value from text.
    fn parse_value(&self, text: &str) -> Result<Self::Value>;

    /// Print a value as text.
    fn encode_value(&self, value: &Self::Value) -> String;

    /// Parse a partial aggregate from text.
    fn parse_partial(&self, text: &str) -> Result<Self::Partial>;

    /// Print a partial aggregate as text.
    fn encode_partial(&self, partial: &Self::Partial) -> String;

    /// `g` applied to a value still in text form.
    fn lift_text(&self, text: &str) -> Result<Self::Partial> {
        Ok(self.lift(&self.parse_value(text)?))
    }
}
