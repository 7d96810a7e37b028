use std::cmp::Reverse;

use thiserror::Error;

use super::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Cannot allocate tax across zero line items")]
    NoLines,
    #[error("Line amount at position {0} is negative")]
    NegativeAmount(usize),
    #[error("Tax total is negative: {0}")]
    NegativeTax(Money),
}

/// Splits `tax_total` across `amounts` in proportion to each amount using the
/// largest-remainder method.
///
/// Each share is truncated to the minor unit first; the leftover units go one at a
/// time to the lines with the largest truncated remainder, ties resolved by line
/// order. The result always sums to `tax_total` exactly and is identical for
/// identical input. When every amount is zero the first line takes the whole tax.
pub fn allocate(amounts: &[Money], tax_total: Money) -> Result<Vec<Money>, AllocationError> {
    if amounts.is_empty() {
        return Err(AllocationError::NoLines);
    }
    if let Some(idx) = amounts.iter().position(|a| a.is_negative()) {
        return Err(AllocationError::NegativeAmount(idx));
    }
    if tax_total.is_negative() {
        return Err(AllocationError::NegativeTax(tax_total));
    }

    let tax = i128::from(tax_total.to_cents());
    let base_total: i128 = amounts.iter().map(|a| i128::from(a.to_cents())).sum();

    if base_total == 0 {
        let mut shares = vec![Money::zero(); amounts.len()];
        shares[0] = tax_total;
        return Ok(shares);
    }

    let mut shares = Vec::with_capacity(amounts.len());
    let mut remainders = Vec::with_capacity(amounts.len());
    for (idx, amount) in amounts.iter().enumerate() {
        let numerator = tax * i128::from(amount.to_cents());
        shares.push(numerator / base_total);
        remainders.push((idx, numerator % base_total));
    }

    // Bounded by the line count: each truncation loses strictly less than one unit.
    let deficit = tax - shares.iter().sum::<i128>();

    // Stable sort keeps line order among equal remainders.
    remainders.sort_by_key(|&(_, rem)| Reverse(rem));
    for &(idx, _) in remainders.iter().take(deficit as usize) {
        shares[idx] += 1;
    }

    Ok(shares
        .into_iter()
        .map(|cents| Money::from_cents(cents as i64))
        .collect())
}
