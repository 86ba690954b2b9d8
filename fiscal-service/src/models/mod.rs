//! Domain models for fiscal-service.

mod invoice;
mod line_item;
mod order;
mod payment;
mod sequence;

pub use invoice::{
    DiscountPolicy, FiscalStamp, Invoice, InvoiceRequest, InvoiceStatus, NewInvoice,
};
pub use line_item::{InvoiceLineItem, LineItemInput, PricedLine};
pub use order::{Order, OrderLine};
pub use payment::{NewPayment, Payment, PaymentMethod, PaymentRequest};
pub use sequence::{Allocation, CreateSequence, FiscalSequence};
