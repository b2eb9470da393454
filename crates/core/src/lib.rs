pub mod types;
pub mod validate;

pub use types::{Customer, Item, Order, OrderLineView, OrderView};
pub use validate::FieldViolation;
