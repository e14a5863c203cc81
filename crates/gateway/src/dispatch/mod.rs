//! Command dispatch.
//!
//! ```text
//! Request ──► Worker ──► prefix lookup ──► command lookup ──► AuthResolver
//!                                                               │
//!                         Response ◄── handler ◄── level gate ◄─┘
//! ```
//!
//! Service tables are built once at startup and never mutated, so dispatch
//! needs no locking.

pub mod auth;
pub mod service;
pub mod worker;

pub use auth::{AuthResolver, Requester};
pub use service::{CommandService, CommandTable, HandlerFuture, Service, ServiceCommand};
pub use worker::{Worker, WorkerBuilder};
