//! Integration tests module

pub mod delegation_test;
pub mod recovery_flow_test;
