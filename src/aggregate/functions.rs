use sha2::{Digest, Sha256};

use super::Aggregator;
use crate::types::{DbTreeError, Result};

fn parse_i32(text: &str) -> Result<i32> {
    text.trim()
        .parse()
        .map_err(|_| DbTreeError::codec("value", text))
}

fn parse_i64(text: &str) -> Result<i64> {
    text.trim()
        .parse()
        .map_err(|_| DbTreeError::codec("aggregate", text))
}

/// Parses the `(a, b)` tuple form used by two-component partials.
fn parse_tuple(text: &str) -> Result<(i64, i64)> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| DbTreeError::codec("aggregate", text))?;
    let (a, b) = inner
        .split_once(',')
        .ok_or_else(|| DbTreeError::codec("aggregate", text))?;
    Ok((parse_i64(a)?, parse_i64(b)?))
}

fn encode_tuple(a: i64, b: i64) -> String {
    format!("({a}, {b})")
}

/// Sum of `i32` values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl Aggregator for Sum {
    type Value = i32;
    type Partial = i64;
    type Output = i64;

    fn name(&self) -> &'static str {
        "sum"
    }

    fn lift(&self, value: &i32) -> i64 {
        i64::from(*value)
    }

    fn combine(&self, parts: &[i64]) -> i64 {
        parts.iter().sum()
    }

    fn finalize(&self, partial: &i64) -> i64 {
        *partial
    }

    fn identity(&self) -> i64 {
        0
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<i64> {
        parse_i64(text)
    }

    fn encode_partial(&self, partial: &i64) -> String {
        partial.to_string()
    }
}

/// Number of stored values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl Aggregator for Count {
    type Value = i32;
    type Partial = i64;
    type Output = i64;

    fn name(&self) -> &'static str {
        "count"
    }

    fn lift(&self, _value: &i32) -> i64 {
        1
    }

    fn combine(&self, parts: &[i64]) -> i64 {
        parts.iter().sum()
    }

    fn finalize(&self, partial: &i64) -> i64 {
        *partial
    }

    fn identity(&self) -> i64 {
        0
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<i64> {
        parse_i64(text)
    }

    fn encode_partial(&self, partial: &i64) -> String {
        partial.to_string()
    }
}

/// Running `(sum, count)` of `i32` values; the output is the pair itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct SumCount;

impl Aggregator for SumCount {
    type Value = i32;
    type Partial = (i64, i64);
    type Output = (i64, i64);

    fn name(&self) -> &'static str {
        "sumcount"
    }

    fn lift(&self, value: &i32) -> (i64, i64) {
        (i64::from(*value), 1)
    }

    fn combine(&self, parts: &[(i64, i64)]) -> (i64, i64) {
        parts
            .iter()
            .fold((0, 0), |(s, c), (ps, pc)| (s + ps, c + pc))
    }

    fn finalize(&self, partial: &(i64, i64)) -> (i64, i64) {
        *partial
    }

    fn identity(&self) -> (i64, i64) {
        (0, 0)
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<(i64, i64)> {
        parse_tuple(text)
    }

    fn encode_partial(&self, partial: &(i64, i64)) -> String {
        encode_tuple(partial.0, partial.1)
    }
}

/// Integer arithmetic mean; the partial is `(count, sum)`. The mean of nothing is 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct Average;

impl Aggregator for Average {
    type Value = i32;
    type Partial = (i64, i64);
    type Output = i64;

    fn name(&self) -> &'static str {
        "average"
    }

    fn lift(&self, value: &i32) -> (i64, i64) {
        (1, i64::from(*value))
    }

    fn combine(&self, parts: &[(i64, i64)]) -> (i64, i64) {
        parts
            .iter()
            .fold((0, 0), |(c, s), (pc, ps)| (c + pc, s + ps))
    }

    fn finalize(&self, partial: &(i64, i64)) -> i64 {
        match partial.0 {
            0 => 0,
            count => partial.1 / count,
        }
    }

    fn identity(&self) -> (i64, i64) {
        (0, 0)
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<(i64, i64)> {
        parse_tuple(text)
    }

    fn encode_partial(&self, partial: &(i64, i64)) -> String {
        encode_tuple(partial.0, partial.1)
    }
}

/// Minimum of `i32` values; `i32::MAX` when empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinInt;

impl Aggregator for MinInt {
    type Value = i32;
    type Partial = i32;
    type Output = i32;

    fn name(&self) -> &'static str {
        "min"
    }

    fn lift(&self, value: &i32) -> i32 {
        *value
    }

    fn combine(&self, parts: &[i32]) -> i32 {
        parts.iter().copied().min().unwrap_or(i32::MAX)
    }

    fn finalize(&self, partial: &i32) -> i32 {
        *partial
    }

    fn identity(&self) -> i32 {
        i32::MAX
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<i32> {
        text.trim()
            .parse()
            .map_err(|_| DbTreeError::codec("aggregate", text))
    }

    fn encode_partial(&self, partial: &i32) -> String {
        partial.to_string()
    }
}

/// Maximum of `i32` values; `i32::MIN` when empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxInt;

impl Aggregator for MaxInt {
    type Value = i32;
    type Partial = i32;
    type Output = i32;

    fn name(&self) -> &'static str {
        "max"
    }

    fn lift(&self, value: &i32) -> i32 {
        *value
    }

    fn combine(&self, parts: &[i32]) -> i32 {
        parts.iter().copied().max().unwrap_or(i32::MIN)
    }

    fn finalize(&self, partial: &i32) -> i32 {
        *partial
    }

    fn identity(&self) -> i32 {
        i32::MIN
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<i32> {
        text.trim()
            .parse()
            .map_err(|_| DbTreeError::codec("aggregate", text))
    }

    fn encode_partial(&self, partial: &i32) -> String {
        partial.to_string()
    }
}

/// Hash aggregation for authenticated trees.
///
/// `g(v)` is the hex SHA-256 of the decimal text of `v`; `f` hashes the concatenation
/// of its inputs in order, so the result depends on the tree shape as well as on the
/// values. The empty string is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashChain;

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Aggregator for HashChain {
    type Value = i32;
    type Partial = String;
    type Output = String;

    fn name(&self) -> &'static str {
        "hash"
    }

    fn lift(&self, value: &i32) -> String {
        sha256_hex(value.to_string().as_bytes())
    }

    fn combine(&self, parts: &[String]) -> String {
        if parts.is_empty() {
            return String::new();
        }
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn finalize(&self, partial: &String) -> String {
        partial.clone()
    }

    fn identity(&self) -> String {
        String::new()
    }

    fn parse_value(&self, text: &str) -> Result<i32> {
        parse_i32(text)
    }

    fn encode_value(&self, value: &i32) -> String {
        value.to_string()
    }

    fn parse_partial(&self, text: &str) -> Result<String> {
        Ok(text.to_owned())
    }

    fn encode_partial(&self, partial: &String) -> String {
        partial.clone()
    }
}
