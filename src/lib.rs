//! # Service Public BJ
//!
//! Aggregates Beninese government-service websites behind a uniform set of
//! MCP tools. Each website is a [`provider::Provider`]; the
//! [`orchestrator::Orchestrator`] routes every request across the registered
//! providers by priority and topical affinity, falls back to cached catalogs
//! when a live fetch fails, and reports which provider answered.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Transports  │──▶│ Orchestrator │──▶│   Providers   │──▶ websites
//! │ stdio / HTTP │   │ rank+fallback│   │ fetch + parse │
//! └──────────────┘   └──────┬───────┘   └───────┬───────┘
//!                           │                   │
//!                           ▼                   ▼
//!                    ┌─────────────┐     ┌─────────────┐
//!                    │ RegistryStore│◀───│ RegistryState│
//!                    │ registry.json│    │ catalogs+idx │
//!                    └─────────────┘     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`error`] | Error taxonomy |
//! | [`fetch`] | HTTP client with TTL cache and concurrency gate |
//! | [`health`] | Fetch outcome monitoring |
//! | [`html`] | Service-page content extraction |
//! | [`provider`] | Provider contract, descriptors, retry |
//! | [`providers`] | Built-in website providers |
//! | [`registry`] | Provider registry |
//! | [`store`] | Shared catalog state and snapshot persistence |
//! | [`orchestrator`] | Ranking and fallback across providers |
//! | [`tools`] | Tool trait and built-in tools |
//! | [`bootstrap`] | Application lifecycle |
//! | [`server`] | HTTP transport |
//! | [`mcp`] | MCP protocol bridge |

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fetch;
pub mod health;
pub mod html;
pub mod mcp;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod server;
pub mod store;
pub mod tools;

pub use service_public_core::{catalog, models, search};
