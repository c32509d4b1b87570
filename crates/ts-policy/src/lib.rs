//! # ts-policy
//!
//! Operator controls for tenant-sweep.
//!
//! This crate provides run modes, confirmation policies and decisions for
//! destructive steps, operator selection parsing, and the kill switch used
//! to cancel a sweep gracefully.

pub mod confirmation;
pub mod kill_switch;
pub mod mode;

pub use confirmation::{
    parse_selection, ConfirmationDecision, ConfirmationPolicy, Confirmer, ProposedRemoval,
    SelectionConfirmer, SelectionError,
};
pub use kill_switch::{Cancelled, KillSwitch, KillSwitchError, KillSwitchEvent, KillSwitchStatus};
pub use mode::RunMode;
