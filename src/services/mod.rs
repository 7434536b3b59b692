pub mod booking;
pub mod email;
pub mod ledger;
pub mod payments;
pub mod pricing;
pub mod scheduling;
pub mod settlement;
pub mod tenancy;
