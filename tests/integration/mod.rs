//! End-to-end tests of the fitting engine.

mod definitions;
mod minimizers;
mod multi_domain;
mod properties;
mod scenarios;
