//! Shared test fixtures and mock collaborators.

#![allow(dead_code)]

pub mod mocks;
