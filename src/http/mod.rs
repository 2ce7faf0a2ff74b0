//! HTTP/1.1 protocol handling for the client side of the proxy.
//!
//! - **`connection`**: per-connection request/response state machine
//! - **`headers`**: ordered, case-insensitive header list
//! - **`parser`**: parses inbound requests from byte buffers
//! - **`request`** / **`response`**: message types
//! - **`writer`**: serializes responses onto the client stream
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received (malformed → 400, then Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Balancer picks a backend and forwards
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
