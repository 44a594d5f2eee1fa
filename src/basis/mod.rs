//! Orbital spaces and basis-change matrices.

pub mod basis_change;
pub mod space;
