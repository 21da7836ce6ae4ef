//! Checked fixed-point helpers shared by the ledger components

use crate::error::{MutualError, Result};

/// `a * b / denominator`, rounded down
#[inline]
pub fn mul_div(a: u128, b: u128, denominator: u128, context: &'static str) -> Result<u128> {
    let (product, denominator) = reduced_product(a, b, denominator, context)?;
    Ok(product / denominator)
}

/// `a * b / denominator`, rounded up
#[inline]
pub fn mul_div_ceil(a: u128, b: u128, denominator: u128, context: &'static str) -> Result<u128> {
    let (product, denominator) = reduced_product(a, b, denominator, context)?;
    Ok(product.div_ceil(denominator))
}

/// `(a' * b', d')` with `a' * b' / d' == a * b / d` as rationals
///
/// Common factors with the denominator are cancelled first when the plain
/// product would not fit, so index math on 18-decimal amounts stays in range.
fn reduced_product(a: u128, b: u128, denominator: u128, context: &'static str) -> Result<(u128, u128)> {
    if denominator == 0 {
        return Err(MutualError::Arithmetic(context));
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok((product, denominator));
    }

    let g1 = gcd(a, denominator);
    let a1 = a / g1;
    let d1 = denominator / g1;
    let g2 = gcd(b, d1);
    let b1 = b / g2;
    let d2 = d1 / g2;

    a1.checked_mul(b1)
        .map(|product| (product, d2))
        .ok_or(MutualError::Arithmetic(context))
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
