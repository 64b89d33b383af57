//! Request pipeline for the admin console.
//!
//! # Overview
//! One shared `ApiClient` carries every call the console makes. It attaches
//! the auth header, picks the real or mock backend, optionally answers from
//! the in-process `MockRouter`, drives the global loading indicator through
//! `LoadingCounter`, and normalizes every reply into the nested payload or a
//! single `ApiError`.
//!
//! # Design
//! - Process-wide state (loading counter, mock flag, token) lives in explicit
//!   objects injected through `ApiClientBuilder`, so tests get fresh state.
//! - The call is split into `prepare` / `finalize` around one dispatch, so
//!   the interceptor contract is testable without a network.
//! - Envelope classification is a total step (`Classified`) that runs before
//!   any unwrapping.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fixtures;
pub mod http;
pub mod loading;
pub mod mock;
pub mod notify;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use client::{ApiClient, ApiClientBuilder, Draft, Outcome, Prepared};
pub use config::{Config, Environment};
pub use envelope::{Classified, Code, Envelope, EnvelopePolicy};
pub use error::ApiError;
pub use http::{CallOptions, HttpMethod, HttpRequest, HttpResponse, ResponseType};
pub use loading::{Indicator, LoadingCounter, LoadingTicket, LogIndicator};
pub use mock::{MockRouter, MockRouterBuilder};
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use session::{Session, TokenStore};
pub use storage::{FileBackend, MemoryBackend, PersistentStore, StorageBackend};
pub use transport::{ReqwestTransport, Transport};
pub use types::{LoginData, LoginParams, UserInfo, UserItem, UserList, UserSearch};
