pub mod availability;
pub mod booking;
pub mod credit;
pub mod invoice;
pub mod payment;
pub mod space;
pub mod tenant;

pub use availability::BookingWindow;
pub use booking::{
    BookingKind, MemberBooking, MemberBookingStatus, OccupiedSlot, PublicBooking,
    PublicBookingStatus,
};
pub use credit::{CreditPeriod, CreditSummary};
pub use invoice::Invoice;
pub use payment::{PaidDetails, Payment, PaymentStatus};
pub use space::Space;
pub use tenant::{Tenant, TenantContext, TenantRole};
