use thiserror::Error;

/// A request field that failed validation, named so the caller can report
/// exactly which field was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {reason}")]
pub struct FieldViolation {
    pub field: &'static str,
    pub reason: &'static str,
}

impl FieldViolation {
    fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// Validates the writable fields of a customer.
pub fn customer_fields(name: &str) -> Result<(), FieldViolation> {
    non_empty("name", name)
}

/// Validates the writable fields of a catalog item.
pub fn item_fields(name: &str, price: f64) -> Result<(), FieldViolation> {
    non_empty("name", name)?;
    if !price.is_finite() {
        return Err(FieldViolation::new("price", "must be a finite number"));
    }
    if price < 0.0 {
        return Err(FieldViolation::new("price", "must not be negative"));
    }
    Ok(())
}

/// Validates the line-item list of an order creation request.
pub fn order_lines(line_items: &[i64]) -> Result<(), FieldViolation> {
    if line_items.is_empty() {
        return Err(FieldViolation::new(
            "line_items",
            "must contain at least one item",
        ));
    }
    Ok(())
}

/// Validates a bulk batch entry quantity.
pub fn quantity(value: u32) -> Result<(), FieldViolation> {
    if value == 0 {
        return Err(FieldViolation::new("quantity", "must be at least 1"));
    }
    Ok(())
}

fn non_empty(field: &'static str, value: &str) -> Result<(), FieldViolation> {
    if value.trim().is_empty() {
        return Err(FieldViolation::new(field, "must not be empty"));
    }
    Ok(())
}
