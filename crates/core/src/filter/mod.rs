//! Parameter mapper: conversion options to engine filter chains.
//!
//! Chains are built as typed [`FilterStage`] lists and only turned into
//! filtergraph text by [`FilterChain::render`] when the engine is invoked.

mod chain;
mod mapper;

pub use chain::{FilterChain, FilterKind, FilterParam, FilterStage, FrameAxis, ParamValue};
pub use mapper::build_filter_chain;
