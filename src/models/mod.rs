pub mod audit;
pub mod cart;
pub mod reservation;
pub mod table;
pub mod user;

pub use audit::{AuditAction, AuditEntry};
pub use cart::{Cart, CartKey, CartRegistry, CartSummary};
pub use reservation::{PaymentMethod, Reservation, ReservationStatus, Slot};
pub use table::{Table, TableCategory, TableStatus};
pub use user::{Actor, Permission, Role};
