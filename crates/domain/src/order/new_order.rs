//! Validated input for creating an order.

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError};

/// A requested order line as it arrives from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Option<Money>,
}

impl NewOrderItem {
    /// Creates a line with a known unit price.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price: Some(unit_price),
        }
    }
}

/// A line that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// A validated order ready to be persisted with status `pending`.
///
/// Construction is the only place the total is computed, so every stored
/// order satisfies `total_price == Σ(quantity × unit_price)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    user_id: UserId,
    lines: Vec<OrderLine>,
    total_price: Money,
}

impl NewOrder {
    /// Validates the request and computes its total.
    ///
    /// Rejects an empty item list, zero quantities, missing or negative
    /// unit prices, prices finer than a cent, and totals that overflow.
    pub fn new(user_id: UserId, items: Vec<NewOrderItem>) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut lines = Vec::with_capacity(items.len());
        let mut total = Money::zero();

        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            let unit_price = item.unit_price.ok_or(OrderError::MissingUnitPrice {
                product_id: item.product_id,
            })?;
            if unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: unit_price,
                });
            }
            if unit_price.amount().normalize().scale() > 2 {
                return Err(OrderError::PriceScale {
                    product_id: item.product_id,
                    price: unit_price,
                });
            }

            total = unit_price
                .checked_multiply(item.quantity)
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or(OrderError::TotalOverflow)?;

            lines.push(OrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price,
            });
        }

        Ok(Self {
            user_id,
            lines,
            total_price: total,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Lines in request order; reservation follows this order.
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }
}
