//! auto-snap-mcp: automated multi-page document capture over MCP
//!
//! This library drives a capture pipeline for documents shown in desktop
//! windows: locate the window, screenshot each page while skipping
//! duplicates and sending the page-turn key, then OCR the pages and assemble
//! them into a PDF. The [`mcp`] module exposes the pipeline as MCP tools.

pub mod capture;
pub mod config;
pub mod error;
pub mod mcp;
pub mod model;
pub mod naming;
pub mod pdf;
pub mod processing;
pub mod session;
pub mod util;
